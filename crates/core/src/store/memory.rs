use super::{OrderBook, ResultStore};
use crate::capture::ResultRecord;
use crate::error::{LabError, LabResult};
use crate::order::{Order, OrderId, OrderStatus};
use crate::panel::PanelType;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> LabResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| LabError::StoreUnavailable("in-memory store lock poisoned".into()))
}

#[derive(Debug, Default)]
pub struct InMemoryOrderBook {
    orders: Mutex<BTreeMap<OrderId, Order>>,
}

impl InMemoryOrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an order.
    pub fn insert(&self, order: Order) -> LabResult<()> {
        lock(&self.orders)?.insert(order.id.clone(), order);
        Ok(())
    }

    pub fn list(&self) -> LabResult<Vec<Order>> {
        Ok(lock(&self.orders)?.values().cloned().collect())
    }
}

impl OrderBook for InMemoryOrderBook {
    fn order(&self, id: &OrderId) -> LabResult<Order> {
        lock(&self.orders)?
            .get(id)
            .cloned()
            .ok_or_else(|| LabError::OrderNotFound(id.clone()))
    }

    fn set_order_status(&self, id: &OrderId, status: OrderStatus) -> LabResult<()> {
        let mut orders = lock(&self.orders)?;
        let order = orders
            .get_mut(id)
            .ok_or_else(|| LabError::OrderNotFound(id.clone()))?;
        order.status = status;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: Mutex<BTreeMap<(OrderId, PanelType), ResultRecord>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for InMemoryResultStore {
    fn get(&self, order_id: &OrderId, panel: PanelType) -> LabResult<Option<ResultRecord>> {
        Ok(lock(&self.records)?
            .get(&(order_id.clone(), panel))
            .cloned())
    }

    fn put(&self, record: &ResultRecord) -> LabResult<()> {
        lock(&self.records)?.insert((record.order_id.clone(), record.panel), record.clone());
        Ok(())
    }

    fn list_for_order(&self, order_id: &OrderId) -> LabResult<Vec<ResultRecord>> {
        Ok(lock(&self.records)?
            .iter()
            .filter(|((id, _), _)| id == order_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReferenceRangeCatalog;
    use crate::order::fixtures::order;
    use crate::report::fixtures::record;
    use lims_types::Gender;

    #[test]
    fn order_book_updates_status_and_reports_missing_orders() {
        let book = InMemoryOrderBook::new();
        let order = order("LAB-1", &[PanelType::Generic], 30, Gender::Male);
        book.insert(order.clone()).unwrap();

        book.set_order_status(&order.id, OrderStatus::Completed)
            .unwrap();
        assert_eq!(book.order(&order.id).unwrap().status, OrderStatus::Completed);

        let missing = OrderId::new("LAB-404").unwrap();
        assert!(matches!(
            book.order(&missing),
            Err(LabError::OrderNotFound(_))
        ));
        assert!(matches!(
            book.set_order_status(&missing, OrderStatus::Cancelled),
            Err(LabError::OrderNotFound(_))
        ));
    }

    #[test]
    fn put_replaces_and_lists_by_order() {
        let catalog = ReferenceRangeCatalog::builtin().unwrap();
        let store = InMemoryResultStore::new();
        let first = order(
            "LAB-1",
            &[PanelType::Generic, PanelType::SerumCreatinine],
            30,
            Gender::Male,
        );
        let other = order("LAB-2", &[PanelType::Generic], 30, Gender::Male);

        let draft = record(&catalog, &first, PanelType::Generic, false);
        store.put(&draft).unwrap();
        let authorized = record(&catalog, &first, PanelType::Generic, true);
        store.put(&authorized).unwrap();
        store
            .put(&record(&catalog, &first, PanelType::SerumCreatinine, false))
            .unwrap();
        store
            .put(&record(&catalog, &other, PanelType::Generic, false))
            .unwrap();

        assert_eq!(
            store.get(&first.id, PanelType::Generic).unwrap(),
            Some(authorized)
        );
        let listed = store.list_for_order(&first.id).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|r| r.order_id == first.id));
    }
}
