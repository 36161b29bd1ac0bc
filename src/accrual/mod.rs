//! Accrual Oracle Client
//!
//! The oracle is the system of record for order processing status and the
//! accrual amount. This module only holds its client contract:
//! - [`AccrualClient`] - lookup seam used by the reconciliation cycle
//! - [`HttpAccrualClient`] - `GET {base}/api/orders/{number}` over reqwest
//! - [`MockAccrualClient`] - scripted responses for tests and local runs

pub mod http;
pub mod mock;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::MONEY_SCALE;
use crate::order::OrderStatus;

pub use http::HttpAccrualClient;
pub use mock::MockAccrualClient;

#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Unexpected response status: {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// Oracle-side status vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
    Unknown(String),
}

impl From<String> for AccrualStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "REGISTERED" => AccrualStatus::Registered,
            "PROCESSING" => AccrualStatus::Processing,
            "INVALID" => AccrualStatus::Invalid,
            "PROCESSED" => AccrualStatus::Processed,
            _ => AccrualStatus::Unknown(s),
        }
    }
}

impl AccrualStatus {
    /// Map onto the internal lifecycle. Unrecognized values become `INVALID`.
    pub fn to_order_status(&self) -> OrderStatus {
        match self {
            AccrualStatus::Registered => OrderStatus::New,
            AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
            AccrualStatus::Unknown(_) => OrderStatus::Invalid,
        }
    }
}

/// Oracle answer for a registered order
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl AccrualResponse {
    /// Reject amounts the ledger cannot credit exactly
    pub fn validate(&self) -> Result<(), AccrualError> {
        match self.accrual {
            Some(amount) if amount < Decimal::ZERO => Err(
                AccrualError::Malformed(format!("negative accrual {} for {}", amount, self.order)),
            ),
            Some(amount) if amount.normalize().scale() > MONEY_SCALE => {
                Err(AccrualError::Malformed(format!(
                    "accrual {} for {} has more than {} decimal places",
                    amount, self.order, MONEY_SCALE
                )))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
pub trait AccrualClient: Send + Sync + Debug {
    /// Look up an order. `Ok(None)` means the oracle does not know it yet.
    async fn fetch(&self, order_number: &str) -> Result<Option<AccrualResponse>, AccrualError>;
}
