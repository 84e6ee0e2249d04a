//! # LIMS Core
//!
//! Diagnostic result engine for the laboratory information system.
//!
//! This crate contains the pure result-handling rules and the file-backed collaborators:
//! - Reference range catalog loaded once from YAML and validated for completeness
//! - Derived values (differential absolute counts, eGFR and its stage)
//! - Result capture with per-panel validation
//! - Per-panel authorization rolling up to the order status
//! - Report composition and Markdown rendering
//!
//! **No API concerns**: HTTP servers and command-line parsing belong in `api-rest` and `cli`.

pub mod authorization;
pub mod calculator;
pub mod capture;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod operator;
pub mod order;
pub mod panel;
pub mod report;
pub mod service;
pub mod store;
pub mod validation;

pub use authorization::PanelState;
pub use calculator::{DerivedValues, FiltrationOutcome, FiltrationStage};
pub use capture::{CapturedValue, RawValues, ResultRecord};
pub use catalog::{ParameterSpec, ReferenceRangeCatalog};
pub use config::{LabConfig, Letterhead};
pub use error::{ErrorClass, LabError, LabResult};
pub use operator::{Operator, OperatorRole, Registration};
pub use order::{Demographics, Order, OrderId, OrderStatus, Patient};
pub use panel::PanelType;
pub use report::{PrintRequest, Report};
pub use service::{AuthorizationOutcome, LabService, OrderProgress};

pub use lims_types::{Age, Gender, NonEmptyText, Salutation, TextError};
