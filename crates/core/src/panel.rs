//! The closed set of orderable test panels.
//!
//! Free-text test names from billing are resolved into a [`PanelType`] once, when the order is
//! created. Everything downstream (catalog lookup, validation, report layout) matches on the
//! enum rather than on the name.

use crate::error::LabError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelType {
    FullBloodCount,
    UrineFullReport,
    SerumCreatinine,
    Generic,
}

impl PanelType {
    pub const ALL: [PanelType; 4] = [
        PanelType::FullBloodCount,
        PanelType::UrineFullReport,
        PanelType::SerumCreatinine,
        PanelType::Generic,
    ];

    /// Stable machine name, also used for storage file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            PanelType::FullBloodCount => "full-blood-count",
            PanelType::UrineFullReport => "urine-full-report",
            PanelType::SerumCreatinine => "serum-creatinine",
            PanelType::Generic => "generic",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            PanelType::FullBloodCount => &["fbc", "full blood count", "cbc"],
            PanelType::UrineFullReport => &["ufr", "urine full report"],
            PanelType::SerumCreatinine => &["sc", "serum creatinine", "creatinine"],
            PanelType::Generic => &[],
        }
    }
}

impl fmt::Display for PanelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PanelType {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        PanelType::ALL
            .into_iter()
            .find(|panel| panel.as_str() == wanted || panel.aliases().contains(&wanted.as_str()))
            .ok_or_else(|| LabError::UnknownPanelType(s.trim().to_string()))
    }
}

/// Parses a comma-separated panel list such as `FBC, serum-creatinine`.
pub fn parse_panel_list(input: &str) -> Result<Vec<PanelType>, LabError> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
