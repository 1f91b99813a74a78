//! Pixel conversion from native camera depth to an 8-bit grayscale plane.
//!
//! Conversion never fails: invalid display scaling falls back to the unscaled
//! path, and unsupported sample depths produce a black plane.

use super::types::{DisplayScaling, Frame, Samples};

/// Converts `frame` into a freshly allocated `width * height` gray plane.
pub fn convert(frame: &Frame, scaling: Option<DisplayScaling>) -> Vec<u8> {
    let mut plane = Vec::new();
    convert_into(frame, scaling, &mut plane);
    plane
}

/// Converts `frame` into `out`, resizing it to `width * height` bytes.
///
/// Samples beyond the end of a short buffer are left black.
pub fn convert_into(frame: &Frame, scaling: Option<DisplayScaling>, out: &mut Vec<u8>) {
    let n = frame.pixel_count();
    out.clear();
    out.resize(n, 0);

    let scaling = scaling.filter(DisplayScaling::is_valid);

    match (&frame.samples, scaling) {
        (Samples::Gray8(data), None) => {
            let len = data.len().min(n);
            out[..len].copy_from_slice(&data[..len]);
        }
        (Samples::Gray8(data), Some(sc)) => {
            let lut = build_lut_u8(sc);
            for (dst, &v) in out.iter_mut().zip(data.iter()) {
                *dst = lut[v as usize];
            }
        }
        (Samples::Gray16(data), None) => {
            for (dst, &v) in out.iter_mut().zip(data.iter()) {
                *dst = (v >> 8) as u8;
            }
        }
        (Samples::Gray16(data), Some(sc)) => {
            let mapper = ScaleMapper::new(sc);
            for (dst, &v) in out.iter_mut().zip(data.iter()) {
                *dst = mapper.map(v as f64);
            }
        }
        (Samples::Raw { bytes_per_pixel, .. }, _) => {
            tracing::trace!(
                target: "mp4stream",
                "[CONVERT] Unsupported sample depth {} bytes, emitting black plane",
                bytes_per_pixel
            );
        }
    }
}

/// Linear window + gamma mapping onto `0..=255`.
struct ScaleMapper {
    min: f64,
    inv_range: f64,
    gamma: f64,
}

impl ScaleMapper {
    fn new(sc: DisplayScaling) -> Self {
        Self {
            min: sc.min,
            inv_range: 1.0 / (sc.max - sc.min),
            gamma: sc.gamma,
        }
    }

    #[inline]
    fn map(&self, v: f64) -> u8 {
        let mut x = ((v - self.min) * self.inv_range).clamp(0.0, 1.0);
        if self.gamma != 1.0 {
            x = x.powf(self.gamma);
        }
        (255.0 * x).round() as u8
    }
}

fn build_lut_u8(sc: DisplayScaling) -> [u8; 256] {
    let mapper = ScaleMapper::new(sc);
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate() {
        *slot = mapper.map(v as f64);
    }
    lut
}
