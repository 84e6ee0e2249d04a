//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Nothing in this crate reads process-wide environment variables during request handling;
//! binaries read them and hand the values to [`letterhead_from_env_values`] and
//! [`LabConfig::new`].

use crate::constants::{DEFAULT_DATA_DIR, DEFAULT_LAB_NAME, ORDERS_DIR_NAME, RESULTS_DIR_NAME};
use crate::{LabError, LabResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Laboratory identity printed at the top of every report.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Letterhead {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl Default for Letterhead {
    fn default() -> Self {
        Self {
            name: DEFAULT_LAB_NAME.to_string(),
            address: None,
            contact: None,
        }
    }
}

/// Build a letterhead from optional raw values (typically `LIMS_LAB_*` variables).
///
/// Blank values are treated as unset; an unset name falls back to the default.
pub fn letterhead_from_env_values(
    name: Option<String>,
    address: Option<String>,
    contact: Option<String>,
) -> Letterhead {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    Letterhead {
        name: clean(name).unwrap_or_else(|| DEFAULT_LAB_NAME.to_string()),
        address: clean(address),
        contact: clean(contact),
    }
}

/// Resolve the data directory, defaulting to `lims_data` relative to the working directory.
pub fn resolve_data_dir(override_dir: Option<PathBuf>) -> PathBuf {
    override_dir
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct LabConfig {
    data_dir: PathBuf,
    letterhead: Letterhead,
}

impl LabConfig {
    pub fn new(data_dir: PathBuf, letterhead: Letterhead) -> LabResult<Self> {
        if letterhead.name.trim().is_empty() {
            return Err(LabError::InvalidInput(
                "laboratory name cannot be empty".into(),
            ));
        }

        Ok(Self {
            data_dir,
            letterhead,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn orders_dir(&self) -> PathBuf {
        self.data_dir.join(ORDERS_DIR_NAME)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.data_dir.join(RESULTS_DIR_NAME)
    }

    pub fn letterhead(&self) -> &Letterhead {
        &self.letterhead
    }
}
