//! Path resolution for crmflow configuration and data files.
//!
//! All crmflow data is stored in `~/.crmflow/`:
//! - `config.yaml` - Main configuration file
//! - `crmflow.db` - SQLite database for records, rules, runs and jobs
//! - `exports/` - Default destination for rule exports

use std::path::PathBuf;

use crate::error::CrmError;

/// Environment variable that overrides the data root.
pub const HOME_ENV: &str = "CRMFLOW_HOME";

/// Paths to crmflow configuration and data directories.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Root directory: `~/.crmflow/`
    pub root: PathBuf,
    /// Config file: `~/.crmflow/config.yaml`
    pub config_file: PathBuf,
    /// Database file: `~/.crmflow/crmflow.db`
    pub database: PathBuf,
    /// Exports directory: `~/.crmflow/exports/`
    pub exports: PathBuf,
}

impl Paths {
    /// Resolve paths from `CRMFLOW_HOME`, falling back to `~/.crmflow`.
    ///
    /// # Errors
    ///
    /// Returns an error if neither `CRMFLOW_HOME` nor `HOME` is set.
    pub fn new() -> Result<Self, CrmError> {
        if let Ok(root) = std::env::var(HOME_ENV) {
            return Ok(Self::with_root(PathBuf::from(root)));
        }

        let home = std::env::var("HOME")
            .map_err(|_| CrmError::Config("Could not determine home directory".to_string()))?;

        Ok(Self::with_root(PathBuf::from(home).join(".crmflow")))
    }

    /// Create paths with a custom root directory.
    #[must_use]
    pub fn with_root(root: PathBuf) -> Self {
        Self {
            config_file: root.join("config.yaml"),
            database: root.join("crmflow.db"),
            exports: root.join("exports"),
            root,
        }
    }

    /// Ensure all directories exist, creating them if necessary.
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation fails.
    pub fn ensure_dirs(&self) -> Result<(), CrmError> {
        for dir in [&self.root, &self.exports] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    CrmError::Config(format!("Failed to create directory {}: {e}", dir.display()))
                })?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_with_root() {
        let root = PathBuf::from("/tmp/test-crmflow");
        let paths = Paths::with_root(root.clone());

        assert_eq!(paths.root, root);
        assert_eq!(paths.config_file, root.join("config.yaml"));
        assert_eq!(paths.database, root.join("crmflow.db"));
        assert_eq!(paths.exports, root.join("exports"));
    }

    #[test]
    fn test_ensure_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let paths = Paths::with_root(temp_dir.path().join("nested"));

        paths.ensure_dirs().unwrap();

        assert!(paths.root.exists());
        assert!(paths.exports.exists());
    }
}
