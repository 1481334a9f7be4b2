pub mod align;
pub mod average;
pub mod reconstruct;

use crate::error::{CliError, Result};
use denss::core::io::mrc::Mrc;
use denss::core::io::traits::MapFile;
use denss::core::models::density::DensityMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// File stem of `path`, used as the output prefix when none is given.
pub(crate) fn default_prefix(path: &Path, fallback: &str) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

pub(crate) fn read_map(path: &Path) -> Result<DensityMap> {
    info!("Loading density map from {:?}", path);
    Mrc::read_from_path(path).map_err(|e| CliError::parsing(path, e))
}

pub(crate) fn read_maps(paths: &[PathBuf]) -> Result<Vec<DensityMap>> {
    paths.iter().map(|p| read_map(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_comes_from_the_file_stem() {
        assert_eq!(default_prefix(&PathBuf::from("/data/lysozyme.dat"), "denss"), "lysozyme");
        assert_eq!(default_prefix(&PathBuf::from("/"), "denss"), "denss");
    }

    #[test]
    fn unreadable_map_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.mrc");
        std::fs::write(&path, b"not a map").unwrap();
        let result = read_map(&path);
        assert!(matches!(result, Err(CliError::FileParsing { path: p, .. }) if p == path));
    }
}
