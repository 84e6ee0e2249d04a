//! Operator identity.
//!
//! Capture and authorization take the acting operator as an explicit argument; there is no
//! ambient "current user". The identity is stamped onto result records and printed in the
//! report footer.

use crate::error::{LabError, LabResult};
use lims_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Staff role, as assigned by the account administrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorRole {
    Admin,
    Billing,
    Technician,
    Satellite,
}

impl OperatorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorRole::Admin => "Admin",
            OperatorRole::Billing => "Billing",
            OperatorRole::Technician => "Technician",
            OperatorRole::Satellite => "Satellite",
        }
    }

    /// Whether this role may enter and authorize results.
    pub fn handles_results(&self) -> bool {
        matches!(self, OperatorRole::Admin | OperatorRole::Technician)
    }
}

impl fmt::Display for OperatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorRole {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            OperatorRole::Admin,
            OperatorRole::Billing,
            OperatorRole::Technician,
            OperatorRole::Satellite,
        ]
        .into_iter()
        .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| LabError::InvalidInput(format!("unknown operator role: {s}")))
    }
}

/// A declared professional registration, printed as `<authority> <number>`.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Registration {
    pub authority: NonEmptyText,
    pub number: NonEmptyText,
}

impl Registration {
    pub fn new(authority: impl Into<String>, number: impl Into<String>) -> LabResult<Self> {
        let authority_str = authority.into().trim().to_string();
        let number_str = number.into().trim().to_string();

        if authority_str.chars().any(char::is_whitespace)
            || number_str.chars().any(char::is_whitespace)
        {
            return Err(LabError::InvalidInput(
                "registration authority and number must not contain whitespace".into(),
            ));
        }

        Ok(Self {
            authority: NonEmptyText::new(authority_str)?,
            number: NonEmptyText::new(number_str)?,
        })
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.authority, self.number)
    }
}

impl FromStr for Registration {
    type Err = LabError;

    /// Parses `SLMC 12345`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(authority), Some(number), None) => Registration::new(authority, number),
            _ => Err(LabError::InvalidInput(format!(
                "registration must be '<authority> <number>', got '{s}'"
            ))),
        }
    }
}

/// The person performing a capture or authorization.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    pub name: NonEmptyText,
    pub role: OperatorRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration: Option<Registration>,
}

impl Operator {
    pub fn new(name: impl AsRef<str>, role: OperatorRole) -> LabResult<Self> {
        Ok(Self {
            name: NonEmptyText::new(name)?,
            role,
            registration: None,
        })
    }

    pub fn with_registration(mut self, registration: Registration) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Fails with [`LabError::NotPermitted`] unless the operator's role handles results.
    pub fn ensure_handles_results(&self, action: &str) -> LabResult<()> {
        if self.role.handles_results() {
            return Ok(());
        }
        Err(LabError::NotPermitted {
            operator: format!("{} ({})", self.name, self.role),
            action: action.to_string(),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.role)?;
        if let Some(registration) = &self.registration {
            write!(f, ", {registration}")?;
        }
        Ok(())
    }
}
