//! Per-panel authorization state and the order-level roll-up.
//!
//! Panel states move `NotStarted → Captured → Authorized`. The order status is never
//! tracked separately; it is recomputed from the records after every authorization.

use crate::capture::{validate_values, Authorization, ResultRecord};
use crate::catalog::ParameterSpec;
use crate::error::{LabError, LabResult};
use crate::operator::Operator;
use crate::order::{Order, OrderStatus};
use crate::panel::PanelType;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PanelState {
    NotStarted,
    Captured,
    Authorized,
}

impl PanelState {
    pub fn of(record: Option<&ResultRecord>) -> Self {
        match record {
            None => PanelState::NotStarted,
            Some(record) if record.is_authorized() => PanelState::Authorized,
            Some(_) => PanelState::Captured,
        }
    }
}

impl fmt::Display for PanelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PanelState::NotStarted => "Not started",
            PanelState::Captured => "Captured",
            PanelState::Authorized => "Authorized",
        })
    }
}

/// State of every ordered panel, in order.
pub fn panel_states(order: &Order, records: &[ResultRecord]) -> Vec<(PanelType, PanelState)> {
    order
        .panels
        .iter()
        .map(|panel| {
            let record = records
                .iter()
                .find(|r| r.order_id == order.id && r.panel == *panel);
            (*panel, PanelState::of(record))
        })
        .collect()
}

/// Order status implied by the records. A cancelled order stays cancelled.
pub fn aggregate_status(order: &Order, records: &[ResultRecord]) -> OrderStatus {
    if order.status == OrderStatus::Cancelled {
        return OrderStatus::Cancelled;
    }
    let states = panel_states(order, records);
    let authorized = states
        .iter()
        .filter(|(_, state)| *state == PanelState::Authorized)
        .count();

    match authorized {
        0 => OrderStatus::Ordered,
        n if n == states.len() => OrderStatus::Completed,
        _ => OrderStatus::PartiallyAuthorized,
    }
}

/// Certify a captured record.
///
/// Re-runs value validation against `specs` (resolved from the record's demographics
/// snapshot) before stamping the authorizing operator and time.
pub fn authorize_record(
    order: &Order,
    mut record: ResultRecord,
    specs: &[ParameterSpec],
    operator: &Operator,
    at: DateTime<Utc>,
) -> LabResult<ResultRecord> {
    order.ensure_not_cancelled()?;
    operator.ensure_handles_results("authorize results")?;
    order.ensure_includes(record.panel)?;
    if record.is_authorized() {
        return Err(LabError::PanelAlreadyAuthorized {
            order_id: order.id.clone(),
            panel: record.panel,
        });
    }

    validate_values(record.panel, specs, &record.raw_values())?;
    record.authorization = Some(Authorization {
        by: operator.clone(),
        at,
    });
    Ok(record)
}
