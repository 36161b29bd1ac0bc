//! Withdraw Service
//!
//! A withdrawal inserts a history entry and debits the ledger in one
//! transaction. When the conditional debit matches no row the whole
//! transaction is rolled back, history entry included.
//!
//! The order reference is recorded as a payment memo. It is not checked
//! against the order store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::ledger::{BalanceLedger, MONEY_SCALE};
use crate::store::{Store, StoreError, StoreTx};

/// Withdrawal history entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Withdrawal {
    #[serde(skip)]
    pub user_login: String,
    #[serde(rename = "order")]
    pub order_number: String,
    #[serde(rename = "sum", with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(rename = "processed_at")]
    pub created_at: DateTime<Utc>,
}

/// Withdrawal history writes (executed inside a store transaction)
#[async_trait]
pub trait WithdrawalLog: Send {
    async fn record_withdrawal(
        &mut self,
        owner: &str,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), StoreError>;
}

#[derive(Error, Debug)]
pub enum WithdrawError {
    #[error("Invalid amount: must be positive with at most 2 decimal places")]
    InvalidAmount,

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("No withdrawals for user")]
    NoWithdrawals,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl WithdrawError {
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawError::InvalidAmount => "INVALID_AMOUNT",
            WithdrawError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            WithdrawError::NoWithdrawals => "NO_WITHDRAWALS",
            WithdrawError::Store(_) => "STORE_ERROR",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawError::InvalidAmount => 400,
            WithdrawError::InsufficientFunds => 402,
            WithdrawError::NoWithdrawals => 204,
            WithdrawError::Store(_) => 500,
        }
    }
}

pub struct WithdrawService<S: Store> {
    store: Arc<S>,
}

impl<S: Store> WithdrawService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Debit `amount` from `login` and record it against `order_ref`
    pub async fn withdraw(
        &self,
        login: &str,
        order_ref: &str,
        amount: Decimal,
    ) -> Result<(), WithdrawError> {
        // Balances are NUMERIC(18,2); finer amounts would be rounded by the store
        if amount <= Decimal::ZERO || amount.normalize().scale() > MONEY_SCALE {
            return Err(WithdrawError::InvalidAmount);
        }

        let mut tx = self.store.begin().await?;

        tx.record_withdrawal(login, order_ref, amount).await?;

        match tx.debit_balance(login, amount).await {
            Ok(()) => {}
            Err(StoreError::InsufficientFunds) => {
                tx.rollback().await?;
                warn!(login = %login, order = %order_ref, amount = %amount, "Withdrawal rejected: insufficient funds");
                return Err(WithdrawError::InsufficientFunds);
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;

        info!(login = %login, order = %order_ref, amount = %amount, "Withdrawal committed");
        Ok(())
    }

    /// Withdrawal history of `login`, oldest first
    pub async fn list_withdrawals(&self, login: &str) -> Result<Vec<Withdrawal>, WithdrawError> {
        match self.store.list_withdrawals(login).await {
            Ok(entries) => Ok(entries),
            Err(StoreError::NoWithdrawals) => Err(WithdrawError::NoWithdrawals),
            Err(e) => Err(e.into()),
        }
    }
}
