//! Laboratory workflow service.
//!
//! [`LabService`] wires the pure engine (catalog, capture, authorization, composition) to the
//! order book and result store collaborators. Every operation is synchronous and complete;
//! validation failures never reach the store.

use crate::authorization::{aggregate_status, authorize_record, panel_states, PanelState};
use crate::calculator::DerivedValues;
use crate::capture::{RawValues, ResultRecord};
use crate::catalog::{ParameterSpec, ReferenceRangeCatalog};
use crate::config::LabConfig;
use crate::error::{ErrorClass, LabError, LabResult};
use crate::operator::Operator;
use crate::order::{Order, OrderId, OrderStatus};
use crate::panel::PanelType;
use crate::report::{compose, PrintRequest, Report};
use crate::store::{OrderBook, ResultStore};
use chrono::{DateTime, Utc};
use lims_types::Gender;
use serde::Serialize;
use std::sync::Arc;

/// Result of a successful authorization.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AuthorizationOutcome {
    pub record: ResultRecord,
    pub order_status: OrderStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PanelProgress {
    pub panel: PanelType,
    pub state: PanelState,
}

/// Where an order stands: aggregate status plus per-panel states.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OrderProgress {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub panels: Vec<PanelProgress>,
}

fn log_refusal(action: &str, order_id: &OrderId, err: LabError) -> LabError {
    if err.class() == ErrorClass::Workflow {
        tracing::warn!(%order_id, error = %err, "{action} refused");
    }
    err
}

#[derive(Clone, Debug)]
pub struct LabService<O, S> {
    catalog: Arc<ReferenceRangeCatalog>,
    config: Arc<LabConfig>,
    orders: O,
    results: S,
}

impl<O: OrderBook, S: ResultStore> LabService<O, S> {
    pub fn new(
        catalog: Arc<ReferenceRangeCatalog>,
        config: Arc<LabConfig>,
        orders: O,
        results: S,
    ) -> Self {
        Self {
            catalog,
            config,
            orders,
            results,
        }
    }

    pub fn catalog(&self) -> &ReferenceRangeCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &LabConfig {
        &self.config
    }

    pub fn orders(&self) -> &O {
        &self.orders
    }

    pub fn results(&self) -> &S {
        &self.results
    }

    pub fn resolve(
        &self,
        panel: PanelType,
        age_years: u32,
        gender: Gender,
    ) -> LabResult<Vec<ParameterSpec>> {
        self.catalog.resolve(panel, age_years, gender)
    }

    /// Validate and store a panel's values, replacing any previous draft.
    ///
    /// # Errors
    ///
    /// - [`LabError::OrderNotFound`], [`LabError::OrderCancelled`], [`LabError::PanelNotOrdered`]
    /// - [`LabError::PanelAlreadyAuthorized`] if the panel has been authorized
    /// - [`LabError::NotPermitted`] for operators who do not handle results
    /// - [`LabError::MissingField`], [`LabError::InvalidValue`],
    ///   [`LabError::DifferentialSumMismatch`] for rejected input
    pub fn capture_result(
        &self,
        order_id: &OrderId,
        panel: PanelType,
        raw: &RawValues,
        comment: Option<String>,
        operator: &Operator,
    ) -> LabResult<ResultRecord> {
        let order = self.orders.order(order_id)?;
        order
            .ensure_not_cancelled()
            .map_err(|e| log_refusal("capture", order_id, e))?;

        if self
            .results
            .get(order_id, panel)?
            .is_some_and(|existing| existing.is_authorized())
        {
            return Err(log_refusal(
                "capture",
                order_id,
                LabError::PanelAlreadyAuthorized {
                    order_id: order_id.clone(),
                    panel,
                },
            ));
        }

        let demographics = order.patient.demographics();
        let specs = self
            .catalog
            .resolve(panel, demographics.age_years, demographics.gender)?;
        let record = ResultRecord::capture(&order, panel, &specs, raw, comment, operator)
            .map_err(|e| log_refusal("capture", order_id, e))?;

        self.results.put(&record)?;
        tracing::info!(
            %order_id,
            %panel,
            operator = %operator.name,
            values = record.values.len(),
            "result captured"
        );
        Ok(record)
    }

    /// Authorize a captured panel now.
    pub fn authorize(
        &self,
        order_id: &OrderId,
        panel: PanelType,
        operator: &Operator,
    ) -> LabResult<AuthorizationOutcome> {
        self.authorize_at(order_id, panel, operator, Utc::now())
    }

    /// Authorize a captured panel with an explicit timestamp.
    ///
    /// Writes the record first, then the recomputed order status.
    pub fn authorize_at(
        &self,
        order_id: &OrderId,
        panel: PanelType,
        operator: &Operator,
        at: DateTime<Utc>,
    ) -> LabResult<AuthorizationOutcome> {
        let order = self.orders.order(order_id)?;
        order
            .ensure_not_cancelled()
            .and_then(|()| order.ensure_includes(panel))
            .map_err(|e| log_refusal("authorization", order_id, e))?;

        let record = self.results.get(order_id, panel)?.ok_or_else(|| {
            log_refusal(
                "authorization",
                order_id,
                LabError::PanelNotCaptured {
                    order_id: order_id.clone(),
                    panel,
                },
            )
        })?;
        let specs = self.catalog.resolve(
            panel,
            record.demographics.age_years,
            record.demographics.gender,
        )?;
        let record = match authorize_record(&order, record, &specs, operator, at) {
            Ok(record) => record,
            Err(e @ LabError::PanelAlreadyAuthorized { .. }) => {
                // A previous authorization may have stored the record but not the status.
                self.sync_order_status(&order)?;
                return Err(log_refusal("authorization", order_id, e));
            }
            Err(e) => return Err(log_refusal("authorization", order_id, e)),
        };
        self.results.put(&record)?;
        let order_status = self.sync_order_status(&order)?;

        tracing::info!(
            %order_id,
            %panel,
            operator = %operator.name,
            status = %order_status,
            "result authorized"
        );
        Ok(AuthorizationOutcome {
            record,
            order_status,
        })
    }

    /// Recompute the aggregate status from the stored records and write it if it changed.
    fn sync_order_status(&self, order: &Order) -> LabResult<OrderStatus> {
        let records = self.results.list_for_order(&order.id)?;
        let order_status = aggregate_status(order, &records);
        if order_status != order.status {
            self.orders.set_order_status(&order.id, order_status)?;
        }
        Ok(order_status)
    }

    pub fn progress(&self, order_id: &OrderId) -> LabResult<OrderProgress> {
        let order = self.orders.order(order_id)?;
        let records = self.results.list_for_order(order_id)?;
        Ok(OrderProgress {
            order_id: order.id.clone(),
            status: aggregate_status(&order, &records),
            panels: panel_states(&order, &records)
                .into_iter()
                .map(|(panel, state)| PanelProgress { panel, state })
                .collect(),
        })
    }

    /// Derived values for a stored record (captured or authorized).
    pub fn derived_values(&self, order_id: &OrderId, panel: PanelType) -> LabResult<DerivedValues> {
        let record =
            self.results
                .get(order_id, panel)?
                .ok_or_else(|| LabError::PanelNotCaptured {
                    order_id: order_id.clone(),
                    panel,
                })?;
        let specs = self.catalog.resolve(
            panel,
            record.demographics.age_years,
            record.demographics.gender,
        )?;
        Ok(DerivedValues::compute(&record, &specs))
    }

    pub fn compose(&self, order_id: &OrderId, request: &PrintRequest) -> LabResult<Report> {
        let order = self.orders.order(order_id)?;
        let records = self.results.list_for_order(order_id)?;
        compose(
            &self.catalog,
            self.config.letterhead(),
            &order,
            &records,
            request,
        )
        .map_err(|e| log_refusal("printing", order_id, e))
    }
}
