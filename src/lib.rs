//! Loyalty Core - order accrual and points ledger
//!
//! Users register purchase order numbers, an external accrual system decides
//! how many points each order earns, and a background reconciliation loop
//! credits those points to the user's balance. Users spend points through
//! withdrawals.
//!
//! # Modules
//!
//! - [`order`] - Orders, Luhn-checked numbers, creation and reconciliation
//! - [`ledger`] - Per-user balance (current, withdrawn)
//! - [`withdraw`] - Point withdrawals and history
//! - [`accrual`] - Accrual system client (HTTP and scripted)
//! - [`store`] - Transactional persistence seam (PostgreSQL, in-memory)
//! - [`scheduler`] - Periodic reconciliation worker pool
//! - [`session`] - Expiring session id store
//! - [`db`] - Connection pool and schema bootstrap

pub mod accrual;
pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod order;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod withdraw;

// Convenient re-exports at crate root
pub use accrual::{AccrualClient, AccrualError, HttpAccrualClient, MockAccrualClient};
pub use ledger::{Balance, BalanceError, BalanceService};
pub use order::{CreateOrderOutcome, Order, OrderError, OrderNumber, OrderService, OrderStatus};
pub use scheduler::{ReconcileCycle, ReconciliationScheduler, SchedulerConfig};
pub use session::{MemorySessionStore, SessionStore};
pub use store::{MemoryStore, PgStore, Store, StoreError, StoreTx};
pub use withdraw::{WithdrawError, WithdrawService, Withdrawal};
