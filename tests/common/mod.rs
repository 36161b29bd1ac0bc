#![allow(dead_code)]

use std::sync::Arc;

use loyalty_core::accrual::MockAccrualClient;
use loyalty_core::order::{OrderNumber, OrderService, luhn_valid};
use loyalty_core::store::MemoryStore;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub accrual: Arc<MockAccrualClient>,
    pub orders: Arc<OrderService<MemoryStore>>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let accrual = Arc::new(MockAccrualClient::new());
    let orders = Arc::new(OrderService::new(store.clone(), accrual.clone()));
    Harness {
        store,
        accrual,
        orders,
    }
}

/// Luhn-valid number built by appending a check digit to `base`
pub fn luhn_number(base: u64) -> OrderNumber {
    let base = base.to_string();
    let raw = (0..10)
        .map(|d| format!("{base}{d}"))
        .find(|candidate| luhn_valid(candidate))
        .expect("one check digit always satisfies Luhn");
    OrderNumber::parse(&raw).unwrap()
}

pub fn number(raw: &str) -> OrderNumber {
    OrderNumber::parse(raw).unwrap()
}
