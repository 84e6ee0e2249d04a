//! Order read model.
//!
//! Orders are created by billing. This crate reads them for patient demographics and the
//! ordered panel list, and writes only the aggregate status (through
//! [`OrderBook::set_order_status`](crate::store::OrderBook::set_order_status)).

use crate::constants::{ORDER_REFERENCE_PREFIX, SELF_REFERRED};
use crate::error::{LabError, LabResult};
use crate::panel::PanelType;
use crate::validation::validate_reference_code;
use chrono::NaiveDate;
use lims_types::{Age, Gender, NonEmptyText, Salutation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Unique order reference code.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderId(String);

impl OrderId {
    pub fn new(code: impl Into<String>) -> LabResult<Self> {
        let code = code.into().trim().to_string();
        validate_reference_code(&code)?;
        Ok(Self(code))
    }

    /// Allocates a fresh reference such as `LAB-3F9A12BC`.
    pub fn generate() -> Self {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}",
            ORDER_REFERENCE_PREFIX,
            simple[..8].to_ascii_uppercase()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderId {
    type Err = LabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for OrderId {
    type Error = LabError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OrderId> for String {
    fn from(id: OrderId) -> Self {
        id.0
    }
}

/// Order lifecycle status.
///
/// `Ordered`, `PartiallyAuthorized` and `Completed` are derived from panel authorization
/// state; `Cancelled` is set by billing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Ordered,
    PartiallyAuthorized,
    Completed,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OrderStatus::Ordered => "Ordered",
            OrderStatus::PartiallyAuthorized => "Partially authorized",
            OrderStatus::Completed => "Completed",
            OrderStatus::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

/// The demographic values reference ranges are resolved against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Demographics {
    pub age_years: u32,
    pub gender: Gender,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patient {
    pub salutation: Salutation,
    pub name: NonEmptyText,
    pub age: Age,
    pub gender: Gender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

impl Patient {
    pub fn demographics(&self) -> Demographics {
        Demographics {
            age_years: self.age.years,
            gender: self.gender,
        }
    }

    /// Name as printed on reports, e.g. `Mrs. K. Perera`.
    pub fn display_name(&self) -> String {
        format!("{}. {}", self.salutation, self.name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub patient: Patient,
    pub referred_by: String,
    pub panels: Vec<PanelType>,
    pub status: OrderStatus,
    pub ordered_on: NaiveDate,
}

impl Order {
    /// Builds a new order in the `Ordered` state.
    ///
    /// # Errors
    ///
    /// - [`LabError::InvalidInput`] if no panels were ordered.
    /// - [`LabError::DuplicatePanel`] if a panel appears twice.
    pub fn new(
        id: OrderId,
        patient: Patient,
        referred_by: Option<String>,
        panels: Vec<PanelType>,
        ordered_on: NaiveDate,
    ) -> LabResult<Self> {
        if panels.is_empty() {
            return Err(LabError::InvalidInput(
                "an order needs at least one panel".into(),
            ));
        }
        let mut seen = HashSet::new();
        for panel in &panels {
            if !seen.insert(*panel) {
                return Err(LabError::DuplicatePanel(*panel));
            }
        }

        let referred_by = referred_by
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| SELF_REFERRED.to_string());

        Ok(Self {
            id,
            patient,
            referred_by,
            panels,
            status: OrderStatus::Ordered,
            ordered_on,
        })
    }

    pub fn includes(&self, panel: PanelType) -> bool {
        self.panels.contains(&panel)
    }

    pub fn ensure_includes(&self, panel: PanelType) -> LabResult<()> {
        if self.includes(panel) {
            return Ok(());
        }
        Err(LabError::PanelNotOrdered {
            order_id: self.id.clone(),
            panel,
        })
    }

    pub fn ensure_not_cancelled(&self) -> LabResult<()> {
        if self.status == OrderStatus::Cancelled {
            return Err(LabError::OrderCancelled(self.id.clone()));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn rejects_duplicate_panels() {
        let err = Order::new(
            OrderId::new("LAB-1").unwrap(),
            patient(30, Gender::Male),
            None,
            vec![PanelType::FullBloodCount, PanelType::FullBloodCount],
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        )
        .expect_err("duplicates are not allowed");
        assert!(matches!(err, LabError::DuplicatePanel(PanelType::FullBloodCount)));
    }

    #[test]
    fn rejects_empty_panel_list() {
        let err = Order::new(
            OrderId::new("LAB-1").unwrap(),
            patient(30, Gender::Male),
            None,
            vec![],
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        )
        .expect_err("empty order");
        assert!(matches!(err, LabError::InvalidInput(_)));
    }

    #[test]
    fn blank_referral_defaults_to_self() {
        let order = Order::new(
            OrderId::new("LAB-1").unwrap(),
            patient(30, Gender::Male),
            Some("  ".into()),
            vec![PanelType::Generic],
            NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
        )
        .unwrap();
        assert_eq!(order.referred_by, SELF_REFERRED);
        assert_eq!(order.status, OrderStatus::Ordered);
    }

    #[test]
    fn generated_ids_are_valid_reference_codes() {
        let id = OrderId::generate();
        assert!(id.as_str().starts_with("LAB-"));
        OrderId::new(id.as_str()).expect("generated id must validate");
    }

    #[test]
    fn order_id_deserialization_validates() {
        assert!(serde_json::from_str::<OrderId>("\"../x\"").is_err());
        assert_eq!(
            serde_json::from_str::<OrderId>("\"LAB-9\"").unwrap().as_str(),
            "LAB-9"
        );
    }

    #[test]
    fn patient_display_name_uses_salutation() {
        assert_eq!(patient(40, Gender::Female).display_name(), "Mrs. K. Perera");
    }
}
