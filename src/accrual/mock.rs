//! Scripted accrual oracle

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{AccrualClient, AccrualError, AccrualResponse, AccrualStatus};

/// Scripted reply for one order number
#[derive(Debug, Clone)]
pub enum MockReply {
    NotRegistered,
    Found {
        status: AccrualStatus,
        accrual: Option<Decimal>,
    },
    TransportFailure,
    RateLimited(Duration),
}

/// Oracle double answering from a per-order script.
///
/// Orders without a scripted reply are reported as not registered.
#[derive(Debug, Default)]
pub struct MockAccrualClient {
    replies: Mutex<HashMap<String, MockReply>>,
    calls: Mutex<Vec<String>>,
    call_count: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl MockAccrualClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reply(&self, order_number: &str, reply: MockReply) {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(order_number.to_string(), reply);
    }

    pub fn set_status(&self, order_number: &str, status: AccrualStatus) {
        self.set_reply(
            order_number,
            MockReply::Found {
                status,
                accrual: None,
            },
        );
    }

    pub fn set_processed(&self, order_number: &str, accrual: Decimal) {
        self.set_reply(
            order_number,
            MockReply::Found {
                status: AccrualStatus::Processed,
                accrual: Some(accrual),
            },
        );
    }

    /// Delay every lookup, to keep concurrent cycles overlapping
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Order numbers looked up so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AccrualClient for MockAccrualClient {
    async fn fetch(&self, order_number: &str) -> Result<Option<AccrualResponse>, AccrualError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(order_number.to_string());

        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let reply = self
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(order_number)
            .cloned()
            .unwrap_or(MockReply::NotRegistered);

        match reply {
            MockReply::NotRegistered => Ok(None),
            MockReply::Found { status, accrual } => Ok(Some(AccrualResponse {
                order: order_number.to_string(),
                status,
                accrual,
            })),
            MockReply::TransportFailure => Err(AccrualError::Transport(
                "Mock transport failure".to_string(),
            )),
            MockReply::RateLimited(retry_after) => Err(AccrualError::RateLimited { retry_after }),
        }
    }
}
