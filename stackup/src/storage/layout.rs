//! Storage layout configuration

use std::path::PathBuf;

use crate::errors::LaunchError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout for launcher state
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Deployment state record
    pub fn deployment_file(&self) -> File {
        File::new(self.base_dir.join("deployment.json"))
    }

    /// Optional settings file
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Root for timestamped diagnostics bundles
    pub fn diagnostics_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("diagnostics"))
    }

    /// Run logs
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Downloaded tool binaries
    pub fn bin_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("bin"))
    }

    /// Scratch space for fetched chart archives
    pub fn work_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("work"))
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), LaunchError> {
        Dir::new(&self.base_dir).create().await?;
        self.diagnostics_dir().create().await?;
        self.logs_dir().create().await?;
        self.bin_dir().create().await?;
        self.work_dir().create().await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/stackup");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".stackup");

        Self::new(base_dir)
    }
}
