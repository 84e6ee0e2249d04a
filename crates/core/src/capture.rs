//! Result record capture and validation.
//!
//! Operators submit raw text per parameter. Validation runs over the whole panel before
//! anything is built, so a rejected capture never yields a partial record.

use crate::catalog::{ParameterRole, ParameterSpec, ValueKind};
use crate::error::{LabError, LabResult};
use crate::operator::Operator;
use crate::order::{Demographics, Order, OrderId};
use crate::panel::PanelType;
use crate::validation::parse_number;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw operator input for one panel: parameter name → entered text.
pub type RawValues = BTreeMap<String, String>;

/// A validated captured value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapturedValue {
    /// `display` keeps the operator's spelling (`"13.0"` stays `"13.0"`).
    Number { display: String, value: f64 },
    Text(String),
}

impl CapturedValue {
    pub fn number(text: &str) -> Option<Self> {
        let display = text.trim();
        parse_number(display).map(|value| CapturedValue::Number {
            display: display.to_string(),
            value,
        })
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CapturedValue::Number { value, .. } => Some(*value),
            CapturedValue::Text(_) => None,
        }
    }

    pub fn display(&self) -> &str {
        match self {
            CapturedValue::Number { display, .. } => display,
            CapturedValue::Text(text) => text,
        }
    }
}

/// Who certified a result, and when.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Authorization {
    pub by: Operator,
    pub at: DateTime<Utc>,
}

/// Captured values for one (order, panel).
///
/// Derived values are deliberately absent; see [`crate::calculator::DerivedValues`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub order_id: OrderId,
    pub panel: PanelType,
    /// Patient demographics at capture time; reference ranges are resolved against these.
    pub demographics: Demographics,
    pub values: BTreeMap<String, CapturedValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub captured_by: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
}

impl ResultRecord {
    /// Validate raw input and build an unauthorized record.
    ///
    /// `specs` must be resolved for `panel` against the order's current demographics.
    /// Workflow checks (order status, previous authorization) are the caller's concern.
    pub fn capture(
        order: &Order,
        panel: PanelType,
        specs: &[ParameterSpec],
        raw: &RawValues,
        comment: Option<String>,
        operator: &Operator,
    ) -> LabResult<Self> {
        operator.ensure_handles_results("capture results")?;
        order.ensure_includes(panel)?;
        let values = validate_values(panel, specs, raw)?;

        Ok(Self {
            order_id: order.id.clone(),
            panel,
            demographics: order.patient.demographics(),
            values,
            comment: comment
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty()),
            captured_by: operator.clone(),
            authorization: None,
        })
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    /// The stored values as operator text, suitable for re-validation.
    pub fn raw_values(&self) -> RawValues {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.display().to_string()))
            .collect()
    }
}

/// Validate a panel's raw values against its resolved parameter specs.
///
/// Checks, in order: every submitted field belongs to the panel, required fields are
/// present (blank text counts as absent), values parse for their kind, and differential
/// percentages are whole numbers in `0..=100` summing to exactly 100.
pub fn validate_values(
    panel: PanelType,
    specs: &[ParameterSpec],
    raw: &RawValues,
) -> LabResult<BTreeMap<String, CapturedValue>> {
    if let Some(unknown) = raw.keys().find(|k| !specs.iter().any(|s| &s.name == *k)) {
        return Err(LabError::InvalidValue {
            panel,
            field: unknown.clone(),
            reason: "not a parameter of this panel".into(),
        });
    }

    let mut values = BTreeMap::new();
    let mut differential = None::<i64>;

    for spec in specs {
        let text = raw
            .get(&spec.name)
            .map(|t| t.trim())
            .filter(|t| !t.is_empty());

        if spec.role == ParameterRole::Differential {
            differential.get_or_insert(0);
        }

        let Some(text) = text else {
            if spec.required {
                return Err(LabError::MissingField {
                    panel,
                    field: spec.name.clone(),
                });
            }
            continue;
        };

        let invalid = |reason: String| LabError::InvalidValue {
            panel,
            field: spec.name.clone(),
            reason,
        };

        let value = match &spec.kind {
            ValueKind::Numeric => {
                let value = CapturedValue::number(text)
                    .ok_or_else(|| invalid(format!("'{text}' is not a number")))?;
                if spec.role == ParameterRole::Differential {
                    let percent = whole_percentage(&value)
                        .ok_or_else(|| invalid(format!("'{text}' is not a whole percentage")))?;
                    differential = differential.map(|sum| sum + percent);
                }
                value
            }
            ValueKind::Choice(options) => options
                .iter()
                .find(|option| option.eq_ignore_ascii_case(text))
                .map(|option| CapturedValue::Text(option.clone()))
                .ok_or_else(|| invalid(format!("expected one of: {}", options.join(", "))))?,
            ValueKind::Text => CapturedValue::Text(text.to_string()),
        };
        values.insert(spec.name.clone(), value);
    }

    if let Some(sum) = differential.filter(|sum| *sum != 100) {
        return Err(LabError::DifferentialSumMismatch { panel, sum });
    }

    Ok(values)
}

fn whole_percentage(value: &CapturedValue) -> Option<i64> {
    let value = value.as_number()?;
    (value.fract() == 0.0 && (0.0..=100.0).contains(&value)).then_some(value as i64)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::operator::{OperatorRole, Registration};

    pub fn technician() -> Operator {
        Operator::new("N. Silva", OperatorRole::Technician)
            .unwrap()
            .with_registration(Registration::new("SLMC", "4471").unwrap())
    }

    pub fn raw(pairs: &[(&str, &str)]) -> RawValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// A complete full-blood-count capture with the given basophil percentage.
    pub fn fbc_values(basophils: &str) -> RawValues {
        raw(&[
            ("Total White Cell Count", "7500"),
            ("Neutrophils", "60"),
            ("Lymphocytes", "30"),
            ("Monocytes", "6"),
            ("Eosinophils", "3"),
            ("Basophils", basophils),
            ("Haemoglobin", "13.0"),
            ("Red Cell Count", "4.8"),
            ("Packed Cell Volume", "41"),
            ("MCV", "88"),
            ("MCH", "29"),
            ("MCHC", "33"),
            ("Platelet Count", "250000"),
        ])
    }

    pub fn creatinine_values(creatinine: &str) -> RawValues {
        raw(&[("Serum Creatinine", creatinine)])
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::catalog::ReferenceRangeCatalog;
    use crate::operator::OperatorRole;
    use crate::order::fixtures::order;
    use lims_types::Gender;

    fn specs(panel: PanelType) -> Vec<ParameterSpec> {
        ReferenceRangeCatalog::builtin()
            .unwrap()
            .resolve(panel, 34, Gender::Female)
            .unwrap()
    }

    #[test]
    fn differential_summing_to_101_is_rejected_with_the_sum() {
        let err = validate_values(
            PanelType::FullBloodCount,
            &specs(PanelType::FullBloodCount),
            &fbc_values("2"),
        )
        .expect_err("sum of 101 must fail");
        assert!(matches!(
            err,
            LabError::DifferentialSumMismatch { sum: 101, .. }
        ));
    }

    #[test]
    fn differential_summing_to_100_is_accepted() {
        let values = validate_values(
            PanelType::FullBloodCount,
            &specs(PanelType::FullBloodCount),
            &fbc_values("1"),
        )
        .expect("sum of 100 is valid");
        assert_eq!(values["Neutrophils"].as_number(), Some(60.0));
        assert_eq!(values["Haemoglobin"].display(), "13.0");
        assert!(!values.contains_key("RDW-CV"));
    }

    #[test]
    fn fractional_differential_is_invalid() {
        let mut raw = fbc_values("1");
        raw.insert("Neutrophils".into(), "59.5".into());
        let err = validate_values(
            PanelType::FullBloodCount,
            &specs(PanelType::FullBloodCount),
            &raw,
        )
        .unwrap_err();
        assert!(matches!(err, LabError::InvalidValue { ref field, .. } if field == "Neutrophils"));
    }

    #[test]
    fn missing_and_blank_required_fields_are_named() {
        let specs = specs(PanelType::FullBloodCount);
        let mut raw = fbc_values("1");
        raw.remove("Haemoglobin");
        let err = validate_values(PanelType::FullBloodCount, &specs, &raw).unwrap_err();
        assert!(matches!(err, LabError::MissingField { ref field, .. } if field == "Haemoglobin"));

        let mut raw = fbc_values("1");
        raw.insert("Platelet Count".into(), "   ".into());
        let err = validate_values(PanelType::FullBloodCount, &specs, &raw).unwrap_err();
        assert!(
            matches!(err, LabError::MissingField { ref field, .. } if field == "Platelet Count")
        );
    }

    #[test]
    fn non_numeric_and_unknown_fields_are_invalid() {
        let specs = specs(PanelType::SerumCreatinine);
        let err = validate_values(PanelType::SerumCreatinine, &specs, &creatinine_values("high"))
            .unwrap_err();
        assert!(matches!(err, LabError::InvalidValue { .. }));

        let mut raw = creatinine_values("1.0");
        raw.insert("Urea".into(), "30".into());
        let err = validate_values(PanelType::SerumCreatinine, &specs, &raw).unwrap_err();
        assert!(matches!(err, LabError::InvalidValue { ref field, .. } if field == "Urea"));
    }

    #[test]
    fn choices_are_stored_in_canonical_spelling() {
        let raw = raw(&[
            ("Colour", "pale yellow"),
            ("Appearance", "CLEAR"),
            ("Protein", "nil"),
            ("Sugar", "+"),
            ("Pus Cells", "2-4"),
            ("Red Cells", "Nil"),
        ]);
        let values = validate_values(
            PanelType::UrineFullReport,
            &specs(PanelType::UrineFullReport),
            &raw,
        )
        .unwrap();
        assert_eq!(values["Colour"], CapturedValue::Text("Pale Yellow".into()));
        assert_eq!(values["Appearance"].display(), "Clear");

        let mut bad = raw.clone();
        bad.insert("Colour".into(), "Green".into());
        let err = validate_values(
            PanelType::UrineFullReport,
            &specs(PanelType::UrineFullReport),
            &bad,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Pale Yellow"));
    }

    #[test]
    fn capture_snapshots_demographics_and_trims_comment() {
        let order = order("LAB-1", &[PanelType::SerumCreatinine], 52, Gender::Male);
        let record = ResultRecord::capture(
            &order,
            PanelType::SerumCreatinine,
            &specs(PanelType::SerumCreatinine),
            &creatinine_values(" 1.1 "),
            Some("  ".into()),
            &technician(),
        )
        .unwrap();
        assert_eq!(record.demographics.age_years, 52);
        assert_eq!(record.comment, None);
        assert!(!record.is_authorized());
        assert_eq!(record.raw_values(), creatinine_values("1.1"));
    }

    #[test]
    fn capture_requires_an_ordered_panel_and_a_permitted_operator() {
        let order = order("LAB-1", &[PanelType::SerumCreatinine], 52, Gender::Male);
        let err = ResultRecord::capture(
            &order,
            PanelType::FullBloodCount,
            &specs(PanelType::FullBloodCount),
            &fbc_values("1"),
            None,
            &technician(),
        )
        .unwrap_err();
        assert!(matches!(err, LabError::PanelNotOrdered { .. }));

        let billing = Operator::new("Front Desk", OperatorRole::Billing).unwrap();
        let err = ResultRecord::capture(
            &order,
            PanelType::SerumCreatinine,
            &specs(PanelType::SerumCreatinine),
            &creatinine_values("1.0"),
            None,
            &billing,
        )
        .unwrap_err();
        assert!(matches!(err, LabError::NotPermitted { .. }));
    }

    #[test]
    fn identical_captures_produce_identical_records() {
        let order = order("LAB-1", &[PanelType::FullBloodCount], 34, Gender::Female);
        let capture = || {
            ResultRecord::capture(
                &order,
                PanelType::FullBloodCount,
                &specs(PanelType::FullBloodCount),
                &fbc_values("1"),
                Some("Slide reviewed".into()),
                &technician(),
            )
            .unwrap()
        };
        assert_eq!(capture(), capture());
    }
}
