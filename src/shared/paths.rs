use std::path::{Path, PathBuf};

const APP_DIR: &str = "mp4stream";

/// Get the base storage directory.
/// Returns `$XDG_DATA_HOME/mp4stream`, else the platform's local data dir.
pub fn get_storage_dir() -> PathBuf {
    if let Ok(xdg_data) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data.is_empty() {
            return PathBuf::from(xdg_data).join(APP_DIR);
        }
    }

    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Get the logs directory path.
/// Returns `{storage_dir}/logs`.
pub fn get_log_dir() -> PathBuf {
    get_storage_dir().join("logs")
}

pub fn default_preferences_path() -> PathBuf {
    get_storage_dir().join("preferences.json")
}

/// Ensure a directory exists, creating it if necessary.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_dir_structure() {
        let storage = get_storage_dir();
        assert!(storage.ends_with("mp4stream"));

        let logs = get_log_dir();
        assert!(logs.ends_with("logs"));
        assert!(logs.starts_with(&storage));

        assert!(default_preferences_path().ends_with("preferences.json"));
    }

    #[test]
    fn test_ensure_dir_creates_nested() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        ensure_dir(&nested).unwrap();
    }
}
