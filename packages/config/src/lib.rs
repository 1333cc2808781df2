#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Configuration for the metalert search tools.
//!
//! Settings are read from a TOML file (`metalert.toml` in the working
//! directory unless `METALERT_CONFIG` points elsewhere):
//!
//! ```toml
//! [main]
//! data_path = "/var/lib/metalert/data"
//!
//! [index]
//! path = "/var/lib/metalert/index"
//! ```
//!
//! `METALERT_DATA_PATH` and `METALERT_INDEX_PATH` override the file. Both
//! folders must exist; nothing here creates them.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "metalert.toml";

/// Environment variable naming an alternative config file.
pub const CONFIG_ENV: &str = "METALERT_CONFIG";

/// Environment variable overriding `main.data_path`.
pub const DATA_PATH_ENV: &str = "METALERT_DATA_PATH";

/// Environment variable overriding `index.path`.
pub const INDEX_PATH_ENV: &str = "METALERT_INDEX_PATH";

/// File name of the embedded index store inside the index folder.
pub const INDEX_FILE_NAME: &str = "index.duckdb";

/// Sub-directory of the data folder holding stored polygons.
pub const SHAPES_DIR_NAME: &str = "shapes";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the config file.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema.
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting was given neither in the file nor the environment.
    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    /// A configured folder does not exist.
    #[error("Setting '{setting}' points to '{}', which is not an existing folder", path.display())]
    NotAFolder {
        /// Dotted name of the offending setting.
        setting: &'static str,
        /// The configured value.
        path: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    main: RawMain,
    #[serde(default)]
    index: RawIndex,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMain {
    data_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawIndex {
    path: Option<PathBuf>,
}

/// Resolved, validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root of the sharded canonical record tree.
    pub data_path: PathBuf,
    /// Folder holding the embedded index store.
    pub index_path: PathBuf,
}

impl Config {
    /// Creates a config from explicit folders without validating them.
    #[must_use]
    pub fn new(data_path: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            index_path: index_path.into(),
        }
    }

    /// Loads the config file named by `METALERT_CONFIG` (or
    /// `metalert.toml`), applies the environment overrides and validates
    /// the result.
    ///
    /// A missing default file is not an error as long as the environment
    /// supplies every setting. A missing file named by `METALERT_CONFIG` is.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, a
    /// setting is missing, or a folder does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let raw = if explicit.is_some() || path.is_file() {
            log::debug!("Loading config from {}", path.display());
            read_raw(&path)?
        } else {
            log::debug!(
                "No {} found, using environment settings only",
                path.display()
            );
            RawConfig::default()
        };

        let config = resolve(
            raw,
            std::env::var_os(DATA_PATH_ENV).map(PathBuf::from),
            std::env::var_os(INDEX_PATH_ENV).map(PathBuf::from),
        )?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a specific config file, without environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// See [`Config::load`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = resolve(read_raw(path)?, None, None)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses config TOML, applying the given overrides. Does not validate.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Missing`].
    pub fn from_toml_str(
        contents: &str,
        data_override: Option<PathBuf>,
        index_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        resolve(raw, data_override, index_override)
    }

    /// Checks that both configured folders exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotAFolder`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (setting, path) in [
            ("main.data_path", &self.data_path),
            ("index.path", &self.index_path),
        ] {
            if !path.is_dir() {
                log::error!(
                    "Setting '{setting}' = '{}' is not an existing folder",
                    path.display()
                );
                return Err(ConfigError::NotAFolder {
                    setting,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Folder holding stored polygons.
    #[must_use]
    pub fn shapes_path(&self) -> PathBuf {
        self.data_path.join(SHAPES_DIR_NAME)
    }

    /// Path of the embedded index store.
    #[must_use]
    pub fn index_file(&self) -> PathBuf {
        self.index_path.join(INDEX_FILE_NAME)
    }
}

fn read_raw(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&contents)?)
}

fn resolve(
    raw: RawConfig,
    data_override: Option<PathBuf>,
    index_override: Option<PathBuf>,
) -> Result<Config, ConfigError> {
    let data_path = data_override
        .or(raw.main.data_path)
        .ok_or(ConfigError::Missing("main.data_path"))?;
    let index_path = index_override
        .or(raw.index.path)
        .ok_or(ConfigError::Missing("index.path"))?;

    Ok(Config {
        data_path,
        index_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[main]
data_path = "/srv/metalert/data"

[index]
path = "/srv/metalert/index"
"#;

    #[test]
    fn parses_both_sections() {
        let config = Config::from_toml_str(SAMPLE, None, None).unwrap();
        assert_eq!(config.data_path, PathBuf::from("/srv/metalert/data"));
        assert_eq!(config.index_path, PathBuf::from("/srv/metalert/index"));
        assert_eq!(
            config.index_file(),
            PathBuf::from("/srv/metalert/index/index.duckdb")
        );
        assert_eq!(
            config.shapes_path(),
            PathBuf::from("/srv/metalert/data/shapes")
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let config =
            Config::from_toml_str(SAMPLE, Some(PathBuf::from("/tmp/override")), None).unwrap();
        assert_eq!(config.data_path, PathBuf::from("/tmp/override"));
        assert_eq!(config.index_path, PathBuf::from("/srv/metalert/index"));
    }

    #[test]
    fn missing_setting_is_named() {
        let err = Config::from_toml_str("[main]\n", None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("main.data_path")));

        let err = Config::from_toml_str("[main]\ndata_path = \"/x\"\n", None, None).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("index.path")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_toml_str("[main]\ndbProvider = \"sqlite\"\n", None, None);
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn validate_requires_existing_folders() {
        let root = std::env::temp_dir().join("metalert_config_validate");
        let _ = std::fs::remove_dir_all(&root);
        let data = root.join("data");
        let index = root.join("index");
        std::fs::create_dir_all(&data).unwrap();

        let config = Config::new(&data, &index);
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NotAFolder {
                setting: "index.path",
                ..
            }
        ));

        std::fs::create_dir_all(&index).unwrap();
        assert!(config.validate().is_ok());

        let file = root.join("metalert.toml");
        std::fs::write(
            &file,
            format!(
                "[main]\ndata_path = {:?}\n\n[index]\npath = {:?}\n",
                data.display().to_string(),
                index.display().to_string()
            ),
        )
        .unwrap();
        assert_eq!(Config::from_file(&file).unwrap(), config);

        let _ = std::fs::remove_dir_all(&root);
    }
}
