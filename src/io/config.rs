//! Read/write fit configuration JSON files.
//!
//! Missing fields fall back to `FitConfig::default()`, so a file only needs to
//! list what differs from the defaults.

use std::fs::File;
use std::path::Path;

use crate::domain::FitConfig;
use crate::error::FitError;

/// Read a configuration JSON file.
pub fn read_config_json(path: &Path) -> Result<FitConfig, FitError> {
    let file = File::open(path)
        .map_err(|e| FitError::data(format!("Failed to open config JSON '{}': {e}", path.display())))?;
    let config: FitConfig = serde_json::from_reader(file)
        .map_err(|e| FitError::configuration(format!("Invalid config JSON '{}': {e}", path.display())))?;
    Ok(config)
}

/// Write a configuration JSON file.
pub fn write_config_json(path: &Path, config: &FitConfig) -> Result<(), FitError> {
    let file = File::create(path)
        .map_err(|e| FitError::data(format!("Failed to create config JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, config)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_a_file() {
        let dir = std::env::temp_dir().join(format!("gamma-likelihood-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fit.json");
        let mut config = FitConfig::default();
        config.bin_width = 0.25;
        config.threshold = None;
        write_config_json(&path, &config).unwrap();
        let back = read_config_json(&path).unwrap();
        assert_eq!(back, config);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_file_is_a_data_error() {
        let err = read_config_json(Path::new("/nonexistent/fit.json")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Data);
    }
}
