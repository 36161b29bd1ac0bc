//! Order Service
//!
//! Order creation with idempotent resubmission and ownership conflict
//! resolution, order listing, and the accrual reconciliation cycle.
//!
//! # Reconciliation cycle
//!
//! ```text
//! BEGIN ── claim (FOR UPDATE SKIP LOCKED) ── oracle lookups ──┐
//!                                                             │
//!   for each answered order:  SAVEPOINT                       │
//!                               update status + accrual       │
//!                               credit ledger (PROCESSED)     │
//!                             RELEASE | ROLLBACK TO SAVEPOINT │
//!                                                             │
//! COMMIT ─────────────────────────────────────────────────────┘
//! ```
//!
//! Claims are held until the cycle commits, so concurrent cycles work on
//! disjoint orders. A failed update rolls back only its own savepoint and the
//! order stays eligible for the next cycle.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::OrderError;
use super::models::{Order, OrderNumber, OrderStatus};
use super::store::OrderStore;
use crate::accrual::{AccrualClient, AccrualError, AccrualResponse};
use crate::ledger::BalanceLedger;
use crate::store::{Store, StoreError, StoreTx};

/// Successful outcomes of order creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOrderOutcome {
    /// Fresh order accepted
    Created,
    /// Same user submitted the same number before. Not an error.
    AlreadyCreatedByCaller,
}

/// Counters of one reconciliation cycle
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Orders claimed by the selection query
    pub claimed: usize,
    /// Orders whose status/accrual update committed
    pub updated: usize,
    /// Of `updated`, orders whose accrual was credited to the ledger
    pub credited: usize,
    /// Orders the oracle does not know yet
    pub not_registered: usize,
    /// Oracle failures plus rolled back updates
    pub failed: usize,
    /// Orders not queried because the oracle asked to back off
    pub deferred: usize,
}

pub struct OrderService<S: Store> {
    store: Arc<S>,
    accrual: Arc<dyn AccrualClient>,
}

impl<S: Store> OrderService<S> {
    pub fn new(store: Arc<S>, accrual: Arc<dyn AccrualClient>) -> Self {
        Self { store, accrual }
    }

    /// Register `number` for `login`.
    ///
    /// The order insert and the zero balance row commit together. A duplicate
    /// number resolves to `AlreadyCreatedByCaller` for the same login and to
    /// `OrderError::OwnedByAnotherUser` otherwise.
    pub async fn create_order(
        &self,
        login: &str,
        number: &OrderNumber,
    ) -> Result<CreateOrderOutcome, OrderError> {
        let mut tx = self.store.begin().await?;

        info!(login = %login, order_number = %number, "Creating order");

        match tx.create_order(login, number).await {
            Ok(order_id) => {
                tx.ensure_balance(login).await?;
                tx.commit().await?;
                info!(login = %login, order_number = %number, order_id, "Order created");
                Ok(CreateOrderOutcome::Created)
            }
            Err(StoreError::DuplicateOrder) => {
                let owner = tx.find_owner(number).await?;
                tx.rollback().await?;
                match owner {
                    Some(owner) if owner == login => {
                        debug!(login = %login, order_number = %number, "Order already created by caller");
                        Ok(CreateOrderOutcome::AlreadyCreatedByCaller)
                    }
                    Some(owner) => {
                        warn!(
                            login = %login,
                            owner = %owner,
                            order_number = %number,
                            "Order number owned by another user"
                        );
                        Err(OrderError::OwnedByAnotherUser)
                    }
                    None => Err(StoreError::Backend(format!(
                        "order {} reported duplicate but has no owner",
                        number
                    ))
                    .into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Orders of `login`, oldest first
    pub async fn list_orders(&self, login: &str) -> Result<Vec<Order>, OrderError> {
        match self.store.list_orders(login).await {
            Ok(orders) => Ok(orders),
            Err(StoreError::NoOrders) => Err(OrderError::NoOrders),
            Err(e) => Err(e.into()),
        }
    }

    /// Run one reconciliation cycle over at most `batch_limit` orders
    pub async fn reconcile(&self, batch_limit: usize) -> Result<ReconcileReport, OrderError> {
        let mut report = ReconcileReport::default();

        let mut tx = self.store.begin().await?;
        let claimed = tx.select_for_reconciliation(batch_limit).await?;
        report.claimed = claimed.len();

        if claimed.is_empty() {
            tx.rollback().await?;
            return Ok(report);
        }

        let mut updates = Vec::with_capacity(claimed.len());
        let mut pending = claimed.into_iter();
        while let Some(order) = pending.next() {
            let answer = self
                .accrual
                .fetch(&order.number)
                .await
                .and_then(|found| match found {
                    Some(response) => response.validate().map(|()| Some(response)),
                    None => Ok(None),
                });
            match answer {
                Ok(None) => {
                    report.not_registered += 1;
                    debug!(order_number = %order.number, "Order not registered in accrual system yet");
                }
                Ok(Some(response)) => {
                    debug!(
                        order_number = %order.number,
                        remote_status = ?response.status,
                        "Fetched accrual status"
                    );
                    updates.push(apply_accrual(order, &response));
                }
                Err(AccrualError::RateLimited { retry_after }) => {
                    report.deferred = 1 + pending.len();
                    warn!(
                        retry_after_secs = retry_after.as_secs(),
                        deferred = report.deferred,
                        "Accrual system rate limit hit, deferring remaining orders"
                    );
                    break;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(order_number = %order.number, error = %e, "Failed to fetch accrual status");
                }
            }
        }

        // Same balance row lock order in every cycle, or concurrent cycles deadlock
        updates.sort_by(|a, b| a.user_login.cmp(&b.user_login).then(a.id.cmp(&b.id)));

        for order in &updates {
            tx.savepoint().await?;
            match persist_update(&mut tx, order).await {
                Ok(credited) => {
                    tx.release_savepoint().await?;
                    report.updated += 1;
                    if credited {
                        report.credited += 1;
                    }
                }
                Err(e) => {
                    tx.rollback_to_savepoint().await?;
                    report.failed += 1;
                    error!(
                        order_number = %order.number,
                        login = %order.user_login,
                        error = %e,
                        "Order update rolled back"
                    );
                }
            }
        }

        tx.commit().await?;

        info!(
            claimed = report.claimed,
            updated = report.updated,
            credited = report.credited,
            not_registered = report.not_registered,
            failed = report.failed,
            deferred = report.deferred,
            "Reconciliation cycle finished"
        );

        Ok(report)
    }
}

/// Fold the oracle answer into the order
fn apply_accrual(mut order: Order, response: &AccrualResponse) -> Order {
    let next = order.status.advance(response.status.to_order_status());
    if next == OrderStatus::Processed && !order.status.is_terminal() {
        order.accrual = Some(response.accrual.unwrap_or(Decimal::ZERO));
    }
    order.status = next;
    order
}

/// Persist one update; returns whether the ledger was credited
async fn persist_update<T: StoreTx>(tx: &mut T, order: &Order) -> Result<bool, StoreError> {
    tx.update_status_and_accrual(order).await?;

    if order.status != OrderStatus::Processed {
        return Ok(false);
    }

    let amount = order.accrual.unwrap_or(Decimal::ZERO);
    tx.credit_balance(&order.user_login, amount).await?;
    info!(
        order_number = %order.number,
        login = %order.user_login,
        accrual = %amount,
        "Accrual credited"
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::AccrualStatus;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus) -> Order {
        Order {
            id: 1,
            user_login: "ilya".to_string(),
            number: "79927398713".to_string(),
            status,
            accrual: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn response(status: AccrualStatus, accrual: Option<Decimal>) -> AccrualResponse {
        AccrualResponse {
            order: "79927398713".to_string(),
            status,
            accrual,
        }
    }

    #[test]
    fn test_apply_accrual_processed_captures_amount() {
        let updated = apply_accrual(
            order(OrderStatus::New),
            &response(AccrualStatus::Processed, Some(dec!(200.21))),
        );
        assert_eq!(updated.status, OrderStatus::Processed);
        assert_eq!(updated.accrual, Some(dec!(200.21)));
    }

    #[test]
    fn test_apply_accrual_processed_without_amount_is_zero() {
        let updated = apply_accrual(
            order(OrderStatus::Processing),
            &response(AccrualStatus::Processed, None),
        );
        assert_eq!(updated.accrual, Some(Decimal::ZERO));
    }

    #[test]
    fn test_apply_accrual_ignores_amount_when_not_processed() {
        let updated = apply_accrual(
            order(OrderStatus::New),
            &response(AccrualStatus::Processing, Some(dec!(10))),
        );
        assert_eq!(updated.status, OrderStatus::Processing);
        assert_eq!(updated.accrual, None);
    }

    #[test]
    fn test_apply_accrual_unknown_status_is_invalid() {
        let updated = apply_accrual(
            order(OrderStatus::New),
            &response(AccrualStatus::Unknown("LOST".into()), None),
        );
        assert_eq!(updated.status, OrderStatus::Invalid);
    }

    #[test]
    fn test_apply_accrual_never_regresses() {
        let updated = apply_accrual(
            order(OrderStatus::Processing),
            &response(AccrualStatus::Registered, None),
        );
        assert_eq!(updated.status, OrderStatus::Processing);
    }
}
