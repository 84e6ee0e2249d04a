//! Reference range catalog.
//!
//! The catalog is loaded once at startup from YAML (the built-in file or an override),
//! validated, and then only read. Validation guarantees that every parameter with reference
//! ranges resolves to exactly one range for every age and every gender, so request-time
//! resolution never falls back to a default. Matching only changes at the age bounds named by
//! the entries, so checking those bounds (plus 0 and `u32::MAX`) covers every `u32` age.
//!
//! ## Range selection
//!
//! Range entries are grouped into priority tiers:
//! 1. entries with an age bound (optionally also gender-specific),
//! 2. gender-only entries,
//! 3. entries with no predicate.
//!
//! The first tier containing a matching entry wins, so "under 5 years" overrides the adult
//! gender-specific ranges. Two matches within one tier is a catalog error.

mod wire;

use crate::error::{LabError, LabResult};
use crate::panel::PanelType;
use lims_types::Gender;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;

const BUILTIN_CATALOG: &str = include_str!("../../catalog/reference_ranges.yaml");

/// How a panel's report body is laid out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Rows of result, unit and numeric reference range.
    Tabular,
    /// Rows of descriptive findings without reference ranges.
    Descriptive,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Numeric,
    Text,
    Choice(Vec<String>),
}

/// What a parameter contributes to derived values and cross-field checks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParameterRole {
    #[default]
    Plain,
    /// A white-cell subtype percentage; the panel's differential must sum to 100.
    Differential,
    /// The total count that differential percentages are converted against.
    TotalCount,
    /// Serum creatinine in mg/dL; drives the filtration-rate estimate.
    Creatinine,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
    Age,
    Gender,
    General,
}

/// Demographic predicate of a range entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Subgroup {
    pub age_from: Option<u32>,
    pub age_below: Option<u32>,
    pub gender: Option<Gender>,
}

impl Subgroup {
    fn tier(&self) -> Tier {
        if self.age_from.is_some() || self.age_below.is_some() {
            Tier::Age
        } else if self.gender.is_some() {
            Tier::Gender
        } else {
            Tier::General
        }
    }

    pub fn matches(&self, age_years: u32, gender: Gender) -> bool {
        self.age_from.map_or(true, |from| age_years >= from)
            && self.age_below.map_or(true, |below| age_years < below)
            && self.gender.map_or(true, |g| g == gender)
    }
}

impl fmt::Display for Subgroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let age = match (self.age_from, self.age_below) {
            (Some(from), Some(below)) => Some(format!("{from}-{} years", below - 1)),
            (None, Some(below)) => Some(format!("under {below} years")),
            (Some(from), None) => Some(format!("{from} years and over")),
            (None, None) => None,
        };
        match (self.gender, age) {
            (Some(gender), Some(age)) => write!(f, "{gender}, {age}"),
            (Some(gender), None) => write!(f, "{gender}"),
            (None, Some(age)) => write!(f, "{age}"),
            (None, None) => f.write_str("all"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RangeEntry {
    pub subgroup: Subgroup,
    pub normal: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub section: Option<String>,
    pub unit: Option<String>,
    pub kind: ValueKind,
    pub required: bool,
    pub role: ParameterRole,
    pub ranges: Vec<RangeEntry>,
}

impl ParameterDefinition {
    /// Pick the range entry for a patient, or `Ok(None)` if the parameter has no ranges.
    fn select_range(
        &self,
        panel: PanelType,
        age_years: u32,
        gender: Gender,
    ) -> LabResult<Option<&RangeEntry>> {
        if self.ranges.is_empty() {
            return Ok(None);
        }

        for tier in [Tier::Age, Tier::Gender, Tier::General] {
            let mut matching = self
                .ranges
                .iter()
                .filter(|entry| entry.subgroup.tier() == tier)
                .filter(|entry| entry.subgroup.matches(age_years, gender));

            if let Some(first) = matching.next() {
                if matching.next().is_some() {
                    return Err(LabError::OverlappingRanges {
                        panel,
                        parameter: self.name.clone(),
                        age_years,
                        gender,
                    });
                }
                return Ok(Some(first));
            }
        }

        Err(LabError::NoMatchingRange {
            panel,
            parameter: self.name.clone(),
            age_years,
            gender,
        })
    }

    /// Ages at which the selected range can change, in ascending order.
    fn boundary_ages(&self) -> BTreeSet<u32> {
        let mut ages = BTreeSet::from([0, u32::MAX]);
        for subgroup in self.ranges.iter().map(|entry| entry.subgroup) {
            if let Some(from) = subgroup.age_from {
                ages.insert(from);
                ages.insert(from.saturating_sub(1));
            }
            if let Some(below) = subgroup.age_below {
                ages.insert(below);
                ages.insert(below.saturating_sub(1));
            }
        }
        ages
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PanelDefinition {
    pub panel: PanelType,
    pub title: String,
    pub layout: Layout,
    pub parameters: Vec<ParameterDefinition>,
}

impl PanelDefinition {
    fn validate(&self) -> LabResult<()> {
        let schema_error = |msg: String| LabError::CatalogSchema(format!("{}: {msg}", self.panel));

        let mut names = HashSet::new();
        for parameter in &self.parameters {
            if !names.insert(parameter.name.to_ascii_lowercase()) {
                return Err(schema_error(format!(
                    "parameter '{}' is defined twice",
                    parameter.name
                )));
            }
            if parameter.role != ParameterRole::Plain && parameter.kind != ValueKind::Numeric {
                return Err(schema_error(format!(
                    "parameter '{}' has a derived-value role but is not numeric",
                    parameter.name
                )));
            }
        }

        let count_role = |role| self.parameters.iter().filter(|p| p.role == role).count();
        let differentials = count_role(ParameterRole::Differential);
        let totals = count_role(ParameterRole::TotalCount);
        if differentials > 0 && totals != 1 {
            return Err(schema_error(format!(
                "a differential panel needs exactly one total-count parameter, found {totals}"
            )));
        }
        if count_role(ParameterRole::Creatinine) > 1 {
            return Err(schema_error("more than one creatinine parameter".into()));
        }

        for parameter in &self.parameters {
            for age_years in parameter.boundary_ages() {
                for gender in Gender::ALL {
                    parameter.select_range(self.panel, age_years, gender)?;
                }
            }
        }

        Ok(())
    }
}

/// A resolved reference range for one patient.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReferenceRange {
    /// Human-readable description of the subgroup the range was selected for.
    pub subgroup: String,
    pub normal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<f64>,
}

/// Result lies outside the reference bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum RangeFlag {
    Low,
    High,
}

impl fmt::Display for RangeFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RangeFlag::Low => "L",
            RangeFlag::High => "H",
        })
    }
}

impl ReferenceRange {
    pub fn flag(&self, value: f64) -> Option<RangeFlag> {
        if self.low.is_some_and(|low| value < low) {
            Some(RangeFlag::Low)
        } else if self.high.is_some_and(|high| value > high) {
            Some(RangeFlag::High)
        } else {
            None
        }
    }
}

/// One parameter of a panel, resolved for a specific patient.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub kind: ValueKind,
    pub required: bool,
    pub role: ParameterRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceRange>,
}

/// Immutable, validated reference range catalog.
#[derive(Clone, Debug)]
pub struct ReferenceRangeCatalog {
    panels: BTreeMap<PanelType, PanelDefinition>,
}

impl ReferenceRangeCatalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> LabResult<Self> {
        Self::from_yaml(BUILTIN_CATALOG)
    }

    /// Read and validate a catalog file.
    pub fn load(path: &Path) -> LabResult<Self> {
        let text = std::fs::read_to_string(path).map_err(LabError::FileRead)?;
        Self::from_yaml(&text)
    }

    /// Load the override file if one is configured, otherwise the built-in catalog.
    pub fn load_or_builtin(path: Option<&Path>) -> LabResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::builtin(),
        }
    }

    /// Parse and validate catalog YAML.
    ///
    /// # Errors
    ///
    /// - [`LabError::CatalogSchema`] on malformed YAML or structural problems.
    /// - [`LabError::UnknownPanelType`] if a panel name is not recognised.
    /// - [`LabError::NoMatchingRange`] / [`LabError::OverlappingRanges`] if some age/gender
    ///   combination does not resolve to exactly one range.
    pub fn from_yaml(yaml_text: &str) -> LabResult<Self> {
        let mut panels = BTreeMap::new();
        for definition in wire::parse_panels(yaml_text)? {
            definition.validate()?;
            let panel = definition.panel;
            if panels.insert(panel, definition).is_some() {
                return Err(LabError::CatalogSchema(format!(
                    "panel {panel} is defined twice"
                )));
            }
        }

        tracing::debug!(panels = panels.len(), "reference range catalog validated");
        Ok(Self { panels })
    }

    pub fn panel(&self, panel: PanelType) -> LabResult<&PanelDefinition> {
        self.panels
            .get(&panel)
            .ok_or_else(|| LabError::UnknownPanelType(panel.to_string()))
    }

    pub fn panels(&self) -> impl Iterator<Item = &PanelDefinition> {
        self.panels.values()
    }

    /// Resolve a panel's parameters, in display order, for a patient.
    ///
    /// Deterministic and side-effect free.
    pub fn resolve(
        &self,
        panel: PanelType,
        age_years: u32,
        gender: Gender,
    ) -> LabResult<Vec<ParameterSpec>> {
        let definition = self.panel(panel)?;
        definition
            .parameters
            .iter()
            .map(|parameter| {
                let reference = parameter
                    .select_range(panel, age_years, gender)?
                    .map(|entry| ReferenceRange {
                        subgroup: entry.subgroup.to_string(),
                        normal: entry.normal.clone(),
                        low: entry.low,
                        high: entry.high,
                    });
                Ok(ParameterSpec {
                    name: parameter.name.clone(),
                    section: parameter.section.clone(),
                    unit: parameter.unit.clone(),
                    kind: parameter.kind.clone(),
                    required: parameter.required,
                    role: parameter.role,
                    reference,
                })
            })
            .collect()
    }
}
