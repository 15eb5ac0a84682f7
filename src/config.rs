//! Runtime configuration.
//!
//! Values come from the environment with sensible defaults; the binary
//! overrides them from its command line flags.

use std::path::PathBuf;

/// Template new items get when none is given
pub const DEFAULT_TEMPLATE: &str = "urn:photo-archive:template:generic";

/// Photo file extensions picked up by an import (lowercase, no dot)
pub const IMPORTABLE: &[&str] = &[
    // Camera RAW formats
    "nef", "dng", "cr2", "cr3", "arw", "raf", "orf", "rw2", "pef", "srw", "erf", "kdc", "dcr",
    "mos", "raw", "rwl",
    // Processed images
    "jpg", "jpeg", "png", "tif", "tiff", "webp", "heic",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Where project files live by default
    pub home: PathBuf,
    /// Template id for imported items
    pub template: String,
    /// Default tracing filter when `RUST_LOG` is unset
    pub log_level: String,
    pub extensions: Vec<String>,
}

impl Config {
    /// Resolve the configuration from `PHOTO_ARCHIVE_*` variables.
    pub fn from_env() -> Self {
        let home = std::env::var_os("PHOTO_ARCHIVE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_home);

        Self {
            home,
            template: std::env::var("PHOTO_ARCHIVE_TEMPLATE")
                .unwrap_or_else(|_| DEFAULT_TEMPLATE.to_string()),
            log_level: std::env::var("PHOTO_ARCHIVE_LOG").unwrap_or_else(|_| "info".to_string()),
            ..Self::default()
        }
    }

    /// The platform data directory, falling back to the home directory and
    /// finally the working directory.
    fn default_home() -> PathBuf {
        let mut path = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        path.push("photo-archive");
        path
    }

    /// Whether a file with this extension is picked up by an import.
    pub fn is_importable(&self, extension: &str) -> bool {
        let ext = extension.to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }

    /// Resolve a project file name against [`Config::home`]; absolute and
    /// explicitly relative paths are kept as given.
    pub fn project_path(&self, name: &str) -> PathBuf {
        let path = PathBuf::from(name);
        if path.is_absolute() || path.components().count() > 1 {
            path
        } else {
            self.home.join(path)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: Self::default_home(),
            template: DEFAULT_TEMPLATE.to_string(),
            log_level: "info".to_string(),
            extensions: IMPORTABLE.iter().map(|e| e.to_string()).collect(),
        }
    }
}
