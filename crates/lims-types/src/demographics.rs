//! Patient demographic primitives.

use crate::TextError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Patient gender as recorded at registration.
///
/// Reference ranges and the filtration-rate equation are keyed on this value, so the set is
/// closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    /// Every gender, in a fixed order. Used for exhaustive catalog checks.
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Ok(Gender::Male),
            "female" | "f" => Ok(Gender::Female),
            _ => Err(TextError::UnknownGender(s.to_string())),
        }
    }
}

/// Patient age in completed years, with optional extra months for infants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Age {
    pub years: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub months: Option<u32>,
}

impl Age {
    pub fn years(years: u32) -> Self {
        Self {
            years,
            months: None,
        }
    }

    /// Builds an age with extra months. Months must be below 12.
    pub fn with_months(years: u32, months: u32) -> Result<Self, TextError> {
        if months >= 12 {
            return Err(TextError::InvalidAge(format!("{years}Y {months}M")));
        }
        Ok(Self {
            years,
            months: Some(months),
        })
    }
}

impl fmt::Display for Age {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.months {
            Some(months) if months > 0 => write!(f, "{}Y {}M", self.years, months),
            _ => write!(f, "{}Y", self.years),
        }
    }
}

impl FromStr for Age {
    type Err = TextError;

    /// Accepts `34`, `34Y`, `34y 5m` and `2Y6M`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TextError::InvalidAge(s.to_string());
        let compact: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        if compact.is_empty() {
            return Err(invalid());
        }

        let (years_part, rest) = match compact.find('Y') {
            Some(pos) => (&compact[..pos], &compact[pos + 1..]),
            None => (compact.as_str(), ""),
        };
        let years: u32 = years_part.parse().map_err(|_| invalid())?;

        if rest.is_empty() {
            return Ok(Age::years(years));
        }
        let months_part = rest.strip_suffix('M').ok_or_else(invalid)?;
        let months: u32 = months_part.parse().map_err(|_| invalid())?;
        Age::with_months(years, months).map_err(|_| invalid())
    }
}

/// Salutation printed in front of the patient name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Salutation {
    Mr,
    Mrs,
    Mast,
    Miss,
    Baby,
    #[serde(rename = "Baby of Mrs")]
    BabyOfMrs,
    Rev,
}

impl Salutation {
    pub const ALL: [Salutation; 7] = [
        Salutation::Mr,
        Salutation::Mrs,
        Salutation::Mast,
        Salutation::Miss,
        Salutation::Baby,
        Salutation::BabyOfMrs,
        Salutation::Rev,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Salutation::Mr => "Mr",
            Salutation::Mrs => "Mrs",
            Salutation::Mast => "Mast",
            Salutation::Miss => "Miss",
            Salutation::Baby => "Baby",
            Salutation::BabyOfMrs => "Baby of Mrs",
            Salutation::Rev => "Rev",
        }
    }
}

impl fmt::Display for Salutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Salutation {
    type Err = TextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().trim_end_matches('.');
        Salutation::ALL
            .into_iter()
            .find(|salutation| salutation.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| TextError::UnknownSalutation(s.to_string()))
    }
}
