//! Order store operations (executed inside a store transaction)

use async_trait::async_trait;

use super::models::{Order, OrderNumber};
use crate::store::StoreError;

#[async_trait]
pub trait OrderStore: Send {
    /// Insert a `NEW` order and return its id.
    ///
    /// A number that already exists fails with `StoreError::DuplicateOrder`.
    /// Detection relies on the unique constraint, never on a prior lookup.
    async fn create_order(&mut self, owner: &str, number: &OrderNumber)
    -> Result<i64, StoreError>;

    /// Login owning `number`, if any
    async fn find_owner(&mut self, number: &OrderNumber) -> Result<Option<String>, StoreError>;

    /// Claim up to `limit` `NEW`/`PROCESSING` orders, oldest first.
    ///
    /// Claimed rows stay locked until the enclosing transaction ends. Rows
    /// already claimed by another open transaction are skipped, not waited on.
    async fn select_for_reconciliation(&mut self, limit: usize) -> Result<Vec<Order>, StoreError>;

    /// Persist `status` and `accrual` of `order` (matched by id)
    async fn update_status_and_accrual(&mut self, order: &Order) -> Result<(), StoreError>;
}
