//! Balance Ledger
//!
//! One balance row per user login holding the spendable `current` sum and
//! the cumulative `withdrawn` sum.
//!
//! # Invariants
//! - `current` never goes negative
//! - `current` grows only through accrual credit, in the same transaction
//!   that marks the order `PROCESSED`
//! - `current` shrinks only through a conditional debit (`current >= amount`)
//!   evaluated by the store in a single statement

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use crate::store::{Store, StoreError};

/// Decimal places kept by the ledger columns (`NUMERIC(18,2)`)
pub const MONEY_SCALE: u32 = 2;

/// Balance snapshot of one user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    #[serde(with = "rust_decimal::serde::float")]
    pub current: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn zero() -> Self {
        Self {
            current: Decimal::ZERO,
            withdrawn: Decimal::ZERO,
        }
    }
}

/// Ledger mutations (executed inside a store transaction)
#[async_trait]
pub trait BalanceLedger: Send {
    /// Create a zero balance row for `owner` if none exists
    async fn ensure_balance(&mut self, owner: &str) -> Result<(), StoreError>;

    /// Add `amount` to the current sum. Missing row is `BalanceNotFound`.
    async fn credit_balance(&mut self, owner: &str, amount: Decimal) -> Result<(), StoreError>;

    /// Move `amount` from current to withdrawn, only if `current >= amount`.
    ///
    /// Fails with `InsufficientFunds` when the condition matched no row.
    async fn debit_balance(&mut self, owner: &str, amount: Decimal) -> Result<(), StoreError>;
}

#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("Balance not found")]
    NotFound,

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for BalanceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::BalanceNotFound => BalanceError::NotFound,
            other => BalanceError::Store(other),
        }
    }
}

impl BalanceError {
    pub fn code(&self) -> &'static str {
        match self {
            BalanceError::NotFound => "BALANCE_NOT_FOUND",
            BalanceError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            BalanceError::NotFound => 404,
            BalanceError::Store(_) => 500,
        }
    }
}

/// Read side of the ledger
pub struct BalanceService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> BalanceService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn current_balance(&self, login: &str) -> Result<Balance, BalanceError> {
        Ok(self.store.current_balance(login).await?)
    }
}
