//! Collaborator interfaces for orders and result records.
//!
//! The billing subsystem owns orders; this crate reads them and writes back the aggregate
//! status only. Result records go through a keyed store whose only guarantee is that the
//! last write for a key persists and is visible to the next read.

mod files;
mod memory;

pub use files::{FileOrderBook, FileResultStore};
pub use memory::{InMemoryOrderBook, InMemoryResultStore};

use crate::capture::ResultRecord;
use crate::error::LabResult;
use crate::order::{Order, OrderId, OrderStatus};
use crate::panel::PanelType;

/// Order read model plus the status-write callback.
pub trait OrderBook {
    /// Fails with [`LabError::OrderNotFound`](crate::LabError::OrderNotFound) for an unknown id.
    fn order(&self, id: &OrderId) -> LabResult<Order>;

    fn set_order_status(&self, id: &OrderId, status: OrderStatus) -> LabResult<()>;
}

/// Keyed result record store. `put` replaces any existing record for the key.
pub trait ResultStore {
    fn get(&self, order_id: &OrderId, panel: PanelType) -> LabResult<Option<ResultRecord>>;

    fn put(&self, record: &ResultRecord) -> LabResult<()>;

    /// Every record stored for an order.
    fn list_for_order(&self, order_id: &OrderId) -> LabResult<Vec<ResultRecord>>;
}
