// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Sectioned `h1sdr.toml` loading.
//!
//! One file may carry settings for several programs, each under its own
//! top-level table. A program reads only its table and fills everything it
//! omits from `serde` defaults. Without an explicit path the file is looked
//! up in the working directory, then the user config directory, then
//! `/etc/h1sdr`.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "h1sdr.toml";
const CONFIG_DIR_NAME: &str = "h1sdr";
const SYSTEM_CONFIG_DIR: &str = "/etc/h1sdr";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML in {origin}: {source}")]
    Parse {
        origin: String,
        source: toml::de::Error,
    },

    #[error("{origin}: missing [{section}] section")]
    MissingSection {
        origin: String,
        section: &'static str,
    },
}

/// Candidate files, most specific first.
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths.push(Path::new(SYSTEM_CONFIG_DIR).join(CONFIG_FILE_NAME));
    paths
}

/// `Ok(None)` when the document has no `[key]` table.
fn section<T: DeserializeOwned>(content: &str, key: &str) -> Result<Option<T>, toml::de::Error> {
    let mut table: toml::Table = content.parse()?;
    match table.remove(key) {
        Some(value) => <T as Deserialize>::deserialize(value).map(Some),
        None => Ok(None),
    }
}

fn read_section<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    section(&content, key).map_err(|source| ConfigError::Parse {
        origin: path.display().to_string(),
        source,
    })
}

/// A program's table in `h1sdr.toml`.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Top-level table name, e.g. `"h1sdr-server"`.
    fn section_key() -> &'static str;

    /// Load from `path`, which must contain the section.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        read_section(path, Self::section_key())?.ok_or_else(|| ConfigError::MissingSection {
            origin: path.display().to_string(),
            section: Self::section_key(),
        })
    }

    fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let origin = "<inline>";
        section(content, Self::section_key())
            .map_err(|source| ConfigError::Parse {
                origin: origin.to_string(),
                source,
            })?
            .ok_or_else(|| ConfigError::MissingSection {
                origin: origin.to_string(),
                section: Self::section_key(),
            })
    }

    /// Load the first file in [`search_paths`] that has the section.
    ///
    /// Files without it are skipped. Falls back to `Default` with no path.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in search_paths().into_iter().filter(|p| p.is_file()) {
            match read_section(&path, Self::section_key())? {
                Some(cfg) => return Ok((cfg, Some(path))),
                None => debug!(
                    "{} has no [{}] section, skipping",
                    path.display(),
                    Self::section_key()
                ),
            }
        }
        Ok((Self::default(), None))
    }
}
