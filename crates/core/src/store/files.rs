//! JSON-file implementations of the store traits.
//!
//! Layout under the data directory:
//! ```text
//! <data_dir>/orders/<order_id>.json
//! <data_dir>/results/<order_id>/<panel>.json
//! ```
//! Order ids are restricted to path-safe characters, so they are used as file names directly.
//! Every write goes to a temporary sibling file which is then renamed over the target.

use super::{OrderBook, ResultStore};
use crate::capture::ResultRecord;
use crate::error::{LabError, LabResult};
use crate::order::{Order, OrderId, OrderStatus};
use crate::panel::PanelType;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const JSON_EXTENSION: &str = "json";

fn write_json<T: Serialize>(path: &Path, value: &T) -> LabResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(LabError::StorageDirCreation)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(LabError::Serialization)?;

    let temp = path.with_extension("json.tmp");
    fs::write(&temp, json).map_err(LabError::FileWrite)?;
    fs::rename(&temp, path).map_err(LabError::FileWrite)
}

/// `Ok(None)` when the file does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> LabResult<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LabError::FileRead(e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(LabError::Deserialization)
}

/// What listing does with a file that cannot be read or parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Unreadable {
    /// Warn and leave the file out.
    Skip,
    /// Fail the whole listing.
    Fail,
}

/// Parse every `*.json` file in `dir`, in file-name order.
fn read_json_dir<T: DeserializeOwned>(dir: &Path, unreadable: Unreadable) -> LabResult<Vec<T>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LabError::FileRead(e)),
    };

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == JSON_EXTENSION))
        .collect();
    paths.sort();

    let mut values = Vec::new();
    for path in paths {
        match read_json(&path) {
            Ok(Some(value)) => values.push(value),
            Ok(None) => {}
            Err(e) if unreadable == Unreadable::Skip => {
                tracing::warn!("skipping unreadable record {}: {}", path.display(), e);
            }
            Err(e) => {
                tracing::error!("unreadable record {}: {}", path.display(), e);
                return Err(e);
            }
        }
    }
    Ok(values)
}

/// Orders stored one JSON file each.
#[derive(Clone, Debug)]
pub struct FileOrderBook {
    orders_dir: PathBuf,
}

impl FileOrderBook {
    pub fn new(orders_dir: PathBuf) -> Self {
        Self { orders_dir }
    }

    fn order_path(&self, id: &OrderId) -> PathBuf {
        self.orders_dir
            .join(id.as_str())
            .with_extension(JSON_EXTENSION)
    }

    /// Register a new order. Existing orders are never overwritten.
    pub fn insert(&self, order: &Order) -> LabResult<()> {
        if self.order_path(&order.id).exists() {
            return Err(LabError::InvalidInput(format!(
                "order {} already exists",
                order.id
            )));
        }
        write_json(&self.order_path(&order.id), order)?;
        tracing::info!(order_id = %order.id, panels = order.panels.len(), "order registered");
        Ok(())
    }

    /// All readable orders, sorted by id.
    pub fn list(&self) -> LabResult<Vec<Order>> {
        read_json_dir(&self.orders_dir, Unreadable::Skip)
    }
}

impl OrderBook for FileOrderBook {
    fn order(&self, id: &OrderId) -> LabResult<Order> {
        read_json(&self.order_path(id))?.ok_or_else(|| LabError::OrderNotFound(id.clone()))
    }

    fn set_order_status(&self, id: &OrderId, status: OrderStatus) -> LabResult<()> {
        let mut order = self.order(id)?;
        order.status = status;
        write_json(&self.order_path(id), &order)
    }
}

/// Result records stored as one JSON file per (order, panel).
#[derive(Clone, Debug)]
pub struct FileResultStore {
    results_dir: PathBuf,
}

impl FileResultStore {
    pub fn new(results_dir: PathBuf) -> Self {
        Self { results_dir }
    }

    fn order_dir(&self, order_id: &OrderId) -> PathBuf {
        self.results_dir.join(order_id.as_str())
    }

    fn record_path(&self, order_id: &OrderId, panel: PanelType) -> PathBuf {
        self.order_dir(order_id)
            .join(panel.as_str())
            .with_extension(JSON_EXTENSION)
    }
}

impl ResultStore for FileResultStore {
    fn get(&self, order_id: &OrderId, panel: PanelType) -> LabResult<Option<ResultRecord>> {
        read_json(&self.record_path(order_id, panel))
    }

    fn put(&self, record: &ResultRecord) -> LabResult<()> {
        write_json(&self.record_path(&record.order_id, record.panel), record)
    }

    /// Fails on any unreadable record: status and reports are computed from the full set.
    fn list_for_order(&self, order_id: &OrderId) -> LabResult<Vec<ResultRecord>> {
        read_json_dir(&self.order_dir(order_id), Unreadable::Fail)
    }
}
