use std::path::{Path, PathBuf};

use super::types::{ENCODING_CODEC, ENCODING_CRF, ENCODING_PRESET, OUTPUT_PIX_FMT};

pub const DEFAULT_ENCODER: &str = "ffmpeg";
/// Upper bound on segment-index probing before the last candidate is reused.
pub const MAX_SEGMENT_PROBES: u32 = 10_000;

/// Empty or whitespace-only settings resolve to `ffmpeg` on the system PATH.
pub fn resolve_encoder_program(configured: Option<&str>) -> String {
    match configured.map(str::trim) {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => DEFAULT_ENCODER.to_string(),
    }
}

/// Builds the full argv (program first) for one segment.
///
/// Input is raw 8-bit gray from stdin at `WxH` and the declared rate; output is
/// H.264 4:2:0 without audio, overwriting any existing file.
pub fn build_encoder_argv(
    program: &str,
    width: u32,
    height: u32,
    fps: f64,
    output_path: &Path,
) -> Vec<String> {
    vec![
        program.to_string(),
        "-y".to_string(),
        "-f".to_string(), "rawvideo".to_string(),
        "-pix_fmt".to_string(), "gray".to_string(),
        "-s".to_string(), format!("{}x{}", width, height),
        "-r".to_string(), format!("{:.3}", fps),
        "-i".to_string(), "-".to_string(),
        "-an".to_string(),
        "-c:v".to_string(), ENCODING_CODEC.to_string(),
        "-preset".to_string(), ENCODING_PRESET.to_string(),
        "-crf".to_string(), ENCODING_CRF.to_string(),
        "-pix_fmt".to_string(), OUTPUT_PIX_FMT.to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

/// `{stem}_{W}x{H}_seg{NNN}.mp4` next to `base`.
pub fn segment_path(base: &Path, width: u32, height: u32, index: u32) -> PathBuf {
    let name = base
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let split = name.len().saturating_sub(4);
    let stem = match name.get(split..) {
        Some(ext) if ext.eq_ignore_ascii_case(".mp4") => &name[..split],
        _ => name.as_str(),
    };

    let seg_name = format!("{}_{}x{}_seg{:03}.mp4", stem, width, height, index);
    match base.parent() {
        Some(parent) => parent.join(seg_name),
        None => PathBuf::from(seg_name),
    }
}

/// Picks the smallest index >= `start` whose segment file does not exist yet.
pub fn next_free_segment(base: &Path, width: u32, height: u32, start: u32) -> (u32, PathBuf) {
    let mut index = start;
    let mut candidate = segment_path(base, width, height, index);

    for _ in 0..MAX_SEGMENT_PROBES {
        if !candidate.exists() {
            return (index, candidate);
        }
        index = index.saturating_add(1);
        candidate = segment_path(base, width, height, index);
    }

    tracing::warn!(
        target: "mp4stream",
        "[SEGMENT] No free segment name after {} probes, reusing {:?}",
        MAX_SEGMENT_PROBES,
        candidate
    );
    (index, candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_encoder_program() {
        assert_eq!(resolve_encoder_program(None), "ffmpeg");
        assert_eq!(resolve_encoder_program(Some("  ")), "ffmpeg");
        assert_eq!(
            resolve_encoder_program(Some("/opt/ffmpeg/bin/ffmpeg")),
            "/opt/ffmpeg/bin/ffmpeg"
        );
    }

    #[test]
    fn test_argv_shape() {
        let argv = build_encoder_argv("ffmpeg", 640, 480, 30.0, Path::new("/tmp/out.mp4"));
        let expected: Vec<&str> = vec![
            "ffmpeg", "-y", "-f", "rawvideo", "-pix_fmt", "gray", "-s", "640x480", "-r",
            "30.000", "-i", "-", "-an", "-c:v", "libx264", "-preset", "veryfast", "-crf", "18",
            "-pix_fmt", "yuv420p", "/tmp/out.mp4",
        ];
        assert_eq!(argv, expected);
    }

    #[test]
    fn test_rate_has_three_decimals() {
        let argv = build_encoder_argv("ffmpeg", 8, 8, 12.5, Path::new("o.mp4"));
        assert!(argv.contains(&"12.500".to_string()));
    }

    #[test]
    fn test_segment_path_strips_mp4() {
        let p = segment_path(Path::new("/data/run/out.MP4"), 640, 480, 3);
        assert_eq!(p, PathBuf::from("/data/run/out_640x480_seg003.mp4"));

        let p = segment_path(Path::new("capture"), 1280, 720, 12);
        assert_eq!(p, PathBuf::from("capture_1280x720_seg012.mp4"));
    }

    #[test]
    fn test_next_free_segment_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out.mp4");
        std::fs::write(segment_path(&base, 64, 64, 0), b"x").unwrap();
        std::fs::write(segment_path(&base, 64, 64, 1), b"x").unwrap();

        let (index, path) = next_free_segment(&base, 64, 64, 0);
        assert_eq!(index, 2);
        assert_eq!(path, dir.path().join("out_64x64_seg002.mp4"));
    }
}
