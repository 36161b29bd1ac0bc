//! Persistence seam
//!
//! `Store` is the pool-level handle: it opens transactions and serves the
//! read-only listings. `StoreTx` is one open transaction and carries every
//! mutating operation of the order store, the balance ledger and the
//! withdrawal log, so that a single logical operation (order creation,
//! one reconciliation update, one withdrawal) commits or rolls back as a unit.
//!
//! Dropping a `StoreTx` without calling `commit` rolls it back. This covers
//! early returns through `?` as well as panics in the body.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::ledger::{Balance, BalanceLedger};
use crate::order::{Order, OrderStore};
use crate::withdraw::{Withdrawal, WithdrawalLog};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Order number already exists")]
    DuplicateOrder,

    #[error("No orders found")]
    NoOrders,

    #[error("No withdrawals found")]
    NoWithdrawals,

    #[error("Balance not found")]
    BalanceNotFound,

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One open store transaction
#[async_trait]
pub trait StoreTx: OrderStore + BalanceLedger + WithdrawalLog + Send + Sized {
    /// Open a nested transaction scope
    async fn savepoint(&mut self) -> Result<(), StoreError>;

    /// Keep everything done since the last `savepoint`
    async fn release_savepoint(&mut self) -> Result<(), StoreError>;

    /// Undo everything done since the last `savepoint`
    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Transactional store handle shared by the services
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    /// All orders of a user, oldest first. Empty set is `NoOrders`.
    async fn list_orders(&self, owner: &str) -> Result<Vec<Order>, StoreError>;

    /// Current and withdrawn sums. Missing row is `BalanceNotFound`.
    async fn current_balance(&self, owner: &str) -> Result<Balance, StoreError>;

    /// Withdrawal history of a user, oldest first. Empty set is `NoWithdrawals`.
    async fn list_withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, StoreError>;
}
