use crate::core::io::MapFileError;
use crate::core::io::mrc::Mrc;
use crate::core::io::traits::MapFile;
use crate::core::io::xplor::Xplor;
use crate::core::models::density::DensityMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

/// Where a workflow writes its files: `{directory}/{prefix}{suffix}`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSpec {
    directory: PathBuf,
    prefix: String,
    /// Also write XPLOR copies of the final maps.
    pub xplor: bool,
}

impl OutputSpec {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            xplor: false,
        }
    }

    pub fn with_xplor(mut self, enabled: bool) -> Self {
        self.xplor = enabled;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn path(&self, suffix: &str) -> PathBuf {
        self.directory.join(format!("{}{}", self.prefix, suffix))
    }

    /// The same directory under `{prefix}{suffix}`.
    pub fn child(&self, suffix: &str) -> Self {
        Self {
            directory: self.directory.clone(),
            prefix: format!("{}{}", self.prefix, suffix),
            xplor: self.xplor,
        }
    }

    pub fn ensure_directory(&self) -> Result<(), MapFileError> {
        fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    /// Writes `{prefix}{suffix}.mrc` and, when enabled, the matching `.xplor`.
    pub fn write_map(&self, map: &DensityMap, suffix: &str) -> Result<PathBuf, MapFileError> {
        let path = self.path(&format!("{suffix}.mrc"));
        Mrc::write_to_path(map, &path)?;
        if self.xplor {
            Xplor::write_to_path(map, self.path(&format!("{suffix}.xplor")))?;
        }
        Ok(path)
    }
}

/// Layer writing plain timestamped lines to `path` (truncated first).
pub fn file_layer<S>(path: &Path) -> Result<impl Layer<S> + Send + Sync + use<S>, MapFileError>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let file = File::create(path)?;
    Ok(fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false))
}

/// Subscriber that sends events at `level` and above to [`file_layer`] only.
pub fn file_subscriber(
    path: &Path,
    level: LevelFilter,
) -> Result<impl Subscriber + Send + Sync + use<>, MapFileError> {
    let layer = file_layer(path)?;
    Ok(tracing_subscriber::registry().with(level).with(layer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::info;

    #[test]
    fn paths_join_prefix_and_suffix() {
        let spec = OutputSpec::new("/tmp/out", "lysozyme");
        assert_eq!(spec.path("_map.fit"), PathBuf::from("/tmp/out/lysozyme_map.fit"));
        assert_eq!(spec.child("_03").path(".log"), PathBuf::from("/tmp/out/lysozyme_03.log"));
    }

    #[test]
    fn maps_are_written_in_both_formats_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let spec = OutputSpec::new(dir.path(), "m").with_xplor(true);
        let map = DensityMap::zeros(4, 8.0).unwrap();
        let path = spec.write_map(&map, "_support").unwrap();
        assert!(path.ends_with("m_support.mrc"));
        assert!(dir.path().join("m_support.xplor").exists());
    }

    #[test]
    fn file_subscriber_captures_scoped_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let subscriber = file_subscriber(&path, LevelFilter::INFO).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            info!(step = 3, "Scoped message.");
            tracing::debug!("Filtered out.");
        });
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Scoped message."));
        assert!(text.contains("step=3"));
        assert!(!text.contains("Filtered out."));
    }
}
