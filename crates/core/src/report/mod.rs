//! Report composition.
//!
//! [`compose`] turns authorized result records into a [`Report`]: a sequence of
//! self-contained documents, one per requested panel, in request order. The document tree is
//! plain data (serialisable for the REST layer); [`markdown`] renders it for printing.
//!
//! Composition is all-or-nothing. Every requested panel must have an authorized record
//! before any document is built.

pub mod markdown;

use crate::calculator::{DerivedValues, FiltrationOutcome};
use crate::capture::ResultRecord;
use crate::catalog::{Layout, ParameterRole, ParameterSpec, RangeFlag, ReferenceRangeCatalog};
use crate::config::Letterhead;
use crate::constants::{NOT_COMPUTABLE, NO_COMMENT};
use crate::error::{LabError, LabResult};
use crate::order::{Order, OrderId};
use crate::panel::PanelType;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;

const EGFR_SECTION: &str = "Estimated GFR (CKD-EPI 2021)";
const EGFR_UNIT: &str = "mL/min/1.73m²";
const EGFR_REFERENCE: &str = ">= 90";

/// Which panels of an order to print.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrintRequest {
    Single(PanelType),
    Panels(Vec<PanelType>),
    /// Every ordered panel, in order.
    Bulk,
}

impl PrintRequest {
    /// The panels to print, checked against the order.
    pub fn panels(&self, order: &Order) -> LabResult<Vec<PanelType>> {
        let panels = match self {
            PrintRequest::Single(panel) => vec![*panel],
            PrintRequest::Panels(panels) => panels.clone(),
            PrintRequest::Bulk => order.panels.clone(),
        };
        if panels.is_empty() {
            return Err(LabError::InvalidInput("no panels requested".into()));
        }

        let mut seen = HashSet::new();
        for panel in &panels {
            if !seen.insert(*panel) {
                return Err(LabError::DuplicatePanel(*panel));
            }
            order.ensure_includes(*panel)?;
        }
        Ok(panels)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Report {
    pub documents: Vec<Document>,
}

impl Report {
    pub fn is_bulk(&self) -> bool {
        self.documents.len() > 1
    }
}

/// One printable document for one panel.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Document {
    pub letterhead: Letterhead,
    pub identification: Identification,
    pub panel: PanelType,
    pub title: String,
    pub body: DocumentBody,
    /// Verbatim comment, or `N/A`.
    pub comment: String,
    pub footer: Footer,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Identification {
    pub order_id: OrderId,
    pub patient_name: String,
    pub age: String,
    pub gender: String,
    pub referred_by: String,
    pub ordered_on: NaiveDate,
}

impl Identification {
    fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id.clone(),
            patient_name: order.patient.display_name(),
            age: order.patient.age.to_string(),
            gender: order.patient.gender.to_string(),
            referred_by: order.referred_by.clone(),
            ordered_on: order.ordered_on,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "layout", content = "sections", rename_all = "lowercase")]
pub enum DocumentBody {
    Tabular(Vec<TableSection>),
    Descriptive(Vec<DescriptiveSection>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub rows: Vec<TableRow>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableRow {
    pub parameter: String,
    pub result: String,
    /// Derived column (absolute count for differential rows).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derived: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flag: Option<RangeFlag>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DescriptiveSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    pub rows: Vec<DescriptiveRow>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DescriptiveRow {
    pub parameter: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Footer {
    pub captured_by: String,
    pub authorized_by: String,
    pub authorized_at: DateTime<Utc>,
}

/// Compose the documents for `request`.
///
/// # Errors
///
/// - [`LabError::OrderCancelled`] if the order is cancelled.
/// - [`LabError::PanelNotOrdered`] / [`LabError::DuplicatePanel`] for a bad request.
/// - [`LabError::PanelNotAuthorized`] if any requested panel lacks an authorized record.
pub fn compose(
    catalog: &ReferenceRangeCatalog,
    letterhead: &Letterhead,
    order: &Order,
    records: &[ResultRecord],
    request: &PrintRequest,
) -> LabResult<Report> {
    order.ensure_not_cancelled()?;
    let panels = request.panels(order)?;

    let authorized = panels
        .iter()
        .map(|panel| {
            records
                .iter()
                .find(|r| r.order_id == order.id && r.panel == *panel && r.is_authorized())
                .ok_or_else(|| LabError::PanelNotAuthorized {
                    order_id: order.id.clone(),
                    panel: *panel,
                })
        })
        .collect::<LabResult<Vec<_>>>()?;

    let documents = authorized
        .into_iter()
        .map(|record| compose_document(catalog, letterhead, order, record))
        .collect::<LabResult<Vec<_>>>()?;

    tracing::info!(
        order_id = %order.id,
        documents = documents.len(),
        "report composed"
    );
    Ok(Report { documents })
}

fn compose_document(
    catalog: &ReferenceRangeCatalog,
    letterhead: &Letterhead,
    order: &Order,
    record: &ResultRecord,
) -> LabResult<Document> {
    let definition = catalog.panel(record.panel)?;
    let specs = catalog.resolve(
        record.panel,
        record.demographics.age_years,
        record.demographics.gender,
    )?;
    let authorization = record
        .authorization
        .as_ref()
        .ok_or_else(|| LabError::PanelNotAuthorized {
            order_id: record.order_id.clone(),
            panel: record.panel,
        })?;

    let body = match definition.layout {
        Layout::Tabular => DocumentBody::Tabular(tabular_sections(record, &specs)),
        Layout::Descriptive => DocumentBody::Descriptive(descriptive_sections(record, &specs)),
    };

    Ok(Document {
        letterhead: letterhead.clone(),
        identification: Identification::for_order(order),
        panel: record.panel,
        title: definition.title.clone(),
        body,
        comment: record
            .comment
            .clone()
            .unwrap_or_else(|| NO_COMMENT.to_string()),
        footer: Footer {
            captured_by: record.captured_by.to_string(),
            authorized_by: authorization.by.to_string(),
            authorized_at: authorization.at,
        },
    })
}

/// Group consecutive items by section heading, keeping display order.
fn sectioned<T>(items: Vec<(Option<String>, T)>) -> Vec<(Option<String>, Vec<T>)> {
    let mut sections: Vec<(Option<String>, Vec<T>)> = Vec::new();
    for (heading, item) in items {
        match sections.last_mut() {
            Some((current, rows)) if *current == heading => rows.push(item),
            _ => sections.push((heading, vec![item])),
        }
    }
    sections
}

fn tabular_sections(record: &ResultRecord, specs: &[ParameterSpec]) -> Vec<TableSection> {
    let derived_values = DerivedValues::compute(record, specs);

    let rows = specs
        .iter()
        .filter_map(|spec| {
            let value = record.values.get(&spec.name)?;
            let reference = spec.reference.as_ref();
            let derived = (spec.role == ParameterRole::Differential).then(|| {
                derived_values
                    .absolute_counts
                    .get(&spec.name)
                    .copied()
                    .flatten()
                    .map_or_else(|| NOT_COMPUTABLE.to_string(), |count| count.to_string())
            });
            let row = TableRow {
                parameter: spec.name.clone(),
                result: value.display().to_string(),
                derived,
                unit: spec.unit.clone(),
                reference_range: reference.map(|r| r.normal.clone()),
                flag: value
                    .as_number()
                    .and_then(|v| reference.and_then(|r| r.flag(v))),
            };
            Some((spec.section.clone(), row))
        })
        .collect();

    let mut sections: Vec<TableSection> = sectioned(rows)
        .into_iter()
        .map(|(heading, rows)| TableSection { heading, rows })
        .collect();

    if let Some(outcome) = derived_values.filtration {
        sections.push(filtration_section(outcome));
    }
    sections
}

fn filtration_section(outcome: FiltrationOutcome) -> TableSection {
    let (egfr, stage, flag) = match outcome {
        FiltrationOutcome::Computed { egfr, stage } => (
            format!("{egfr:.1}"),
            stage.to_string(),
            (egfr < 90.0).then_some(RangeFlag::Low),
        ),
        FiltrationOutcome::NotApplicable => {
            ("Not applicable".to_string(), "Not applicable".to_string(), None)
        }
        FiltrationOutcome::NotComputable => {
            (NOT_COMPUTABLE.to_string(), NOT_COMPUTABLE.to_string(), None)
        }
    };

    TableSection {
        heading: Some(EGFR_SECTION.to_string()),
        rows: vec![
            TableRow {
                parameter: "eGFR".to_string(),
                result: egfr,
                derived: None,
                unit: Some(EGFR_UNIT.to_string()),
                reference_range: Some(EGFR_REFERENCE.to_string()),
                flag,
            },
            TableRow {
                parameter: "CKD Stage".to_string(),
                result: stage,
                derived: None,
                unit: None,
                reference_range: None,
                flag: None,
            },
        ],
    }
}

fn descriptive_sections(record: &ResultRecord, specs: &[ParameterSpec]) -> Vec<DescriptiveSection> {
    let rows = specs
        .iter()
        .filter_map(|spec| {
            let value = record.values.get(&spec.name)?;
            let row = DescriptiveRow {
                parameter: spec.name.clone(),
                value: value.display().to_string(),
            };
            Some((spec.section.clone(), row))
        })
        .collect();

    sectioned(rows)
        .into_iter()
        .map(|(heading, rows)| DescriptiveSection { heading, rows })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::fixtures::record;
    use super::*;
    use crate::order::fixtures::order;
    use crate::order::OrderStatus;
    use lims_types::Gender;

    fn catalog() -> ReferenceRangeCatalog {
        ReferenceRangeCatalog::builtin().unwrap()
    }

    fn two_panel_order() -> Order {
        order(
            "LAB-9",
            &[PanelType::FullBloodCount, PanelType::UrineFullReport],
            34,
            Gender::Female,
        )
    }

    #[test]
    fn bulk_print_is_all_or_nothing() {
        let catalog = catalog();
        let order = two_panel_order();
        let records = vec![
            record(&catalog, &order, PanelType::FullBloodCount, true),
            record(&catalog, &order, PanelType::UrineFullReport, false),
        ];
        let err = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Bulk,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            LabError::PanelNotAuthorized {
                panel: PanelType::UrineFullReport,
                ..
            }
        ));

        let single = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Single(PanelType::FullBloodCount),
        )
        .unwrap();
        assert_eq!(single.documents.len(), 1);
        assert!(!single.is_bulk());
    }

    #[test]
    fn bulk_print_yields_one_document_per_panel_in_order() {
        let catalog = catalog();
        let order = two_panel_order();
        let records = vec![
            record(&catalog, &order, PanelType::UrineFullReport, true),
            record(&catalog, &order, PanelType::FullBloodCount, true),
        ];
        let report = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Bulk,
        )
        .unwrap();
        let panels: Vec<_> = report.documents.iter().map(|d| d.panel).collect();
        assert_eq!(
            panels,
            vec![PanelType::FullBloodCount, PanelType::UrineFullReport]
        );
        assert!(report.is_bulk());
    }

    #[test]
    fn full_blood_count_rows_carry_absolute_counts_and_ranges() {
        let catalog = catalog();
        let order = two_panel_order();
        let records = vec![record(&catalog, &order, PanelType::FullBloodCount, true)];
        let report = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Single(PanelType::FullBloodCount),
        )
        .unwrap();
        let document = &report.documents[0];
        assert_eq!(document.comment, NO_COMMENT);
        assert_eq!(document.identification.patient_name, "Mrs. K. Perera");

        let DocumentBody::Tabular(sections) = &document.body else {
            panic!("full blood count is tabular");
        };
        let differential = sections
            .iter()
            .find(|s| s.heading.as_deref() == Some("Differential Count"))
            .unwrap();
        let neutrophils = &differential.rows[0];
        assert_eq!(neutrophils.parameter, "Neutrophils");
        assert_eq!(neutrophils.derived.as_deref(), Some("4500"));
        assert_eq!(neutrophils.reference_range.as_deref(), Some("40 - 75"));

        // Optional RDW-CV was not entered.
        assert!(sections
            .iter()
            .flat_map(|s| &s.rows)
            .all(|row| row.parameter != "RDW-CV"));
    }

    #[test]
    fn creatinine_report_carries_filtration_stage() {
        let catalog = catalog();
        let adult = order("LAB-3", &[PanelType::SerumCreatinine], 50, Gender::Male);
        let records = vec![record(&catalog, &adult, PanelType::SerumCreatinine, true)];
        let report = compose(
            &catalog,
            &Letterhead::default(),
            &adult,
            &records,
            &PrintRequest::Bulk,
        )
        .unwrap();
        let DocumentBody::Tabular(sections) = &report.documents[0].body else {
            panic!("creatinine is tabular");
        };
        let egfr = sections.last().unwrap();
        assert_eq!(egfr.heading.as_deref(), Some(EGFR_SECTION));
        assert!(egfr.rows[1].result.starts_with("G1"));

        let child = order("LAB-4", &[PanelType::SerumCreatinine], 12, Gender::Male);
        let records = vec![record(&catalog, &child, PanelType::SerumCreatinine, true)];
        let report = compose(
            &catalog,
            &Letterhead::default(),
            &child,
            &records,
            &PrintRequest::Bulk,
        )
        .unwrap();
        let DocumentBody::Tabular(sections) = &report.documents[0].body else {
            panic!("creatinine is tabular");
        };
        assert_eq!(sections.last().unwrap().rows[0].result, "Not applicable");
        // Child range selected from the demographics snapshot.
        assert_eq!(
            sections[0].rows[0].reference_range.as_deref(),
            Some("0.3 - 0.7")
        );
        assert_eq!(sections[0].rows[0].flag, Some(RangeFlag::High));
    }

    #[test]
    fn descriptive_panels_have_no_reference_ranges() {
        let catalog = catalog();
        let order = two_panel_order();
        let records = vec![record(&catalog, &order, PanelType::UrineFullReport, true)];
        let report = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Single(PanelType::UrineFullReport),
        )
        .unwrap();
        let DocumentBody::Descriptive(sections) = &report.documents[0].body else {
            panic!("urine full report is descriptive");
        };
        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_deref()).collect();
        assert_eq!(
            headings,
            vec![
                Some("Physical Examination"),
                Some("Chemical Examination"),
                Some("Microscopy")
            ]
        );
    }

    #[test]
    fn cancelled_and_unordered_requests_are_refused() {
        let catalog = catalog();
        let mut order = two_panel_order();
        let records = vec![record(&catalog, &order, PanelType::FullBloodCount, true)];

        let err = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Single(PanelType::SerumCreatinine),
        )
        .unwrap_err();
        assert!(matches!(err, LabError::PanelNotOrdered { .. }));

        order.status = OrderStatus::Cancelled;
        let err = compose(
            &catalog,
            &Letterhead::default(),
            &order,
            &records,
            &PrintRequest::Single(PanelType::FullBloodCount),
        )
        .unwrap_err();
        assert!(matches!(err, LabError::OrderCancelled(_)));
    }

    #[test]
    fn composition_is_deterministic() {
        let catalog = catalog();
        let order = two_panel_order();
        let records = vec![
            record(&catalog, &order, PanelType::FullBloodCount, true),
            record(&catalog, &order, PanelType::UrineFullReport, true),
        ];
        let compose_once = || {
            compose(
                &catalog,
                &Letterhead::default(),
                &order,
                &records,
                &PrintRequest::Bulk,
            )
            .unwrap()
        };
        assert_eq!(compose_once(), compose_once());
    }
}
