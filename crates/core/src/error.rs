use crate::order::OrderId;
use crate::panel::PanelType;
use lims_types::{Gender, TextError};

/// Coarse classification of a [`LabError`], used by callers to decide how to surface it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Catalog or configuration is wrong; fix the data, never recoverable per request.
    Configuration,
    /// Operator input was rejected; correct and resubmit.
    Input,
    /// A workflow precondition is not met; complete the prior step first.
    Workflow,
    /// The referenced order does not exist.
    NotFound,
    /// The persistence collaborator failed.
    Storage,
}

#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Text(#[from] TextError),

    #[error("unknown panel type: {0}")]
    UnknownPanelType(String),
    #[error(
        "no reference range for {panel} / {parameter} matches age {age_years} ({gender})"
    )]
    NoMatchingRange {
        panel: PanelType,
        parameter: String,
        age_years: u32,
        gender: Gender,
    },
    #[error(
        "more than one reference range for {panel} / {parameter} matches age {age_years} ({gender})"
    )]
    OverlappingRanges {
        panel: PanelType,
        parameter: String,
        age_years: u32,
        gender: Gender,
    },
    #[error("reference range catalog is invalid: {0}")]
    CatalogSchema(String),

    #[error("{panel}: required field '{field}' is missing")]
    MissingField { panel: PanelType, field: String },
    #[error("{panel}: invalid value for '{field}': {reason}")]
    InvalidValue {
        panel: PanelType,
        field: String,
        reason: String,
    },
    #[error("{panel}: differential count sums to {sum}%, expected 100%")]
    DifferentialSumMismatch { panel: PanelType, sum: i64 },

    #[error("order not found: {0}")]
    OrderNotFound(OrderId),
    #[error("order {0} is cancelled")]
    OrderCancelled(OrderId),
    #[error("panel {0} is listed more than once")]
    DuplicatePanel(PanelType),
    #[error("panel {panel} was not ordered on {order_id}")]
    PanelNotOrdered { order_id: OrderId, panel: PanelType },
    #[error("panel {panel} on {order_id} has no captured result")]
    PanelNotCaptured { order_id: OrderId, panel: PanelType },
    #[error("panel {panel} on {order_id} is already authorized")]
    PanelAlreadyAuthorized { order_id: OrderId, panel: PanelType },
    #[error("panel {panel} on {order_id} is not authorized")]
    PanelNotAuthorized { order_id: OrderId, panel: PanelType },
    #[error("{operator} is not permitted to {action}")]
    NotPermitted { operator: String, action: String },

    #[error("failed to create storage directory: {0}")]
    StorageDirCreation(std::io::Error),
    #[error("failed to write record file: {0}")]
    FileWrite(std::io::Error),
    #[error("failed to read record file: {0}")]
    FileRead(std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialization(serde_json::Error),
    #[error("failed to deserialize record: {0}")]
    Deserialization(serde_json::Error),
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LabError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LabError::UnknownPanelType(_)
            | LabError::NoMatchingRange { .. }
            | LabError::OverlappingRanges { .. }
            | LabError::CatalogSchema(_) => ErrorClass::Configuration,
            LabError::InvalidInput(_)
            | LabError::Text(_)
            | LabError::MissingField { .. }
            | LabError::InvalidValue { .. }
            | LabError::DifferentialSumMismatch { .. }
            | LabError::DuplicatePanel(_) => ErrorClass::Input,
            LabError::OrderCancelled(_)
            | LabError::PanelNotOrdered { .. }
            | LabError::PanelNotCaptured { .. }
            | LabError::PanelAlreadyAuthorized { .. }
            | LabError::PanelNotAuthorized { .. }
            | LabError::NotPermitted { .. } => ErrorClass::Workflow,
            LabError::OrderNotFound(_) => ErrorClass::NotFound,
            LabError::StorageDirCreation(_)
            | LabError::FileWrite(_)
            | LabError::FileRead(_)
            | LabError::Serialization(_)
            | LabError::Deserialization(_)
            | LabError::StoreUnavailable(_) => ErrorClass::Storage,
        }
    }
}

pub type LabResult<T> = std::result::Result<T, LabError>;
