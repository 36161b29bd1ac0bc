//! In-memory store
//!
//! Embedded backend with the same transactional contract as the PostgreSQL
//! store, used by the test suites and for local runs without a database.
//!
//! - Writes are journaled per transaction and applied on commit
//! - Row locks (claimed orders, touched balances) are held until the
//!   transaction ends; a conflicting writer waits, like a row lock
//! - `select_for_reconciliation` skips orders claimed by other transactions
//! - Dropping an uncommitted transaction discards its journal and locks

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::{Store, StoreError, StoreTx};
use crate::ledger::{Balance, BalanceLedger};
use crate::order::{Order, OrderNumber, OrderStatus, OrderStore};
use crate::withdraw::{Withdrawal, WithdrawalLog};

#[derive(Debug, Clone, Copy, Default)]
struct BalanceRow {
    current: Decimal,
    withdrawn: Decimal,
}

#[derive(Default)]
struct State {
    next_order_id: i64,
    next_tx_id: u64,
    orders: Vec<Order>,
    balances: HashMap<String, BalanceRow>,
    withdrawals: Vec<Withdrawal>,
    /// order id -> holding transaction
    order_locks: HashMap<i64, u64>,
    /// login -> holding transaction
    balance_locks: HashMap<String, u64>,
    /// uncommitted order number -> inserting transaction
    pending_numbers: HashMap<String, u64>,
    failing_credits: HashSet<String>,
}

struct Shared {
    state: Mutex<State>,
    released: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release_tx(&self, tx_id: u64) {
        {
            let mut state = self.lock();
            state.order_locks.retain(|_, holder| *holder != tx_id);
            state.balance_locks.retain(|_, holder| *holder != tx_id);
            state.pending_numbers.retain(|_, holder| *holder != tx_id);
        }
        self.released.notify_waiters();
    }
}

/// Store kept entirely in process memory
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                released: Notify::new(),
            }),
        }
    }

    /// Test support: make every balance credit for `owner` fail with a
    /// backend error until switched off again. Not meant for production use.
    pub fn set_fail_credit(&self, owner: &str, fail: bool) {
        let mut state = self.shared.lock();
        if fail {
            state.failing_credits.insert(owner.to_string());
        } else {
            state.failing_credits.remove(owner);
        }
    }

    /// Committed order by number
    pub fn find_order(&self, number: &str) -> Option<Order> {
        self.shared
            .lock()
            .orders
            .iter()
            .find(|o| o.number == number)
            .cloned()
    }

    /// Number of committed orders
    pub fn order_count(&self) -> usize {
        self.shared.lock().orders.len()
    }
}

#[derive(Debug)]
enum Op {
    InsertOrder(Order),
    EnsureBalance(String),
    UpdateOrder {
        id: i64,
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    Credit {
        owner: String,
        amount: Decimal,
    },
    Debit {
        owner: String,
        amount: Decimal,
    },
    RecordWithdrawal(Withdrawal),
}

/// Open in-memory transaction
pub struct MemoryTx {
    shared: Arc<Shared>,
    id: u64,
    ops: Vec<Op>,
    savepoints: Vec<usize>,
    finished: bool,
}

impl MemoryTx {
    /// Retry `attempt` until it returns `Some`, parking on lock releases.
    ///
    /// `attempt` runs under the state mutex and returns `None` while the row
    /// it needs is held by another transaction.
    async fn acquire<T, F>(&self, mut attempt: F) -> T
    where
        F: FnMut(&mut State) -> Option<T> + Send,
        T: Send,
    {
        loop {
            let released = self.shared.released.notified();
            let outcome = {
                let mut state = self.shared.lock();
                attempt(&mut state)
            };
            if let Some(outcome) = outcome {
                return outcome;
            }
            released.await;
        }
    }

    async fn lock_balance(&self, owner: &str) {
        let tx_id = self.id;
        let newly_locked = self
            .acquire(|state| match state.balance_locks.get(owner) {
                Some(holder) if *holder != tx_id => None,
                Some(_) => Some(false),
                None => {
                    state.balance_locks.insert(owner.to_string(), tx_id);
                    Some(true)
                }
            })
            .await;

        // A row lock costs a round trip on a real database; let other
        // transactions interleave here as they would there
        if newly_locked {
            tokio::task::yield_now().await;
        }
    }

    /// Balance row as seen by this transaction (committed + own journal)
    fn effective_balance(&self, owner: &str) -> Option<BalanceRow> {
        let mut row = self.shared.lock().balances.get(owner).copied();
        for op in &self.ops {
            match op {
                Op::EnsureBalance(o) if o == owner => {
                    row.get_or_insert_with(BalanceRow::default);
                }
                Op::Credit { owner: o, amount } if o == owner => {
                    if let Some(r) = row.as_mut() {
                        r.current += *amount;
                    }
                }
                Op::Debit { owner: o, amount } if o == owner => {
                    if let Some(r) = row.as_mut() {
                        r.current -= *amount;
                        r.withdrawn += *amount;
                    }
                }
                _ => {}
            }
        }
        row
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.shared.release_tx(self.id);
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.finish();
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let id = {
            let mut state = self.shared.lock();
            state.next_tx_id += 1;
            state.next_tx_id
        };
        Ok(MemoryTx {
            shared: self.shared.clone(),
            id,
            ops: Vec::new(),
            savepoints: Vec::new(),
            finished: false,
        })
    }

    async fn list_orders(&self, owner: &str) -> Result<Vec<Order>, StoreError> {
        let mut orders: Vec<Order> = self
            .shared
            .lock()
            .orders
            .iter()
            .filter(|o| o.user_login == owner)
            .cloned()
            .collect();

        if orders.is_empty() {
            return Err(StoreError::NoOrders);
        }
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(orders)
    }

    async fn current_balance(&self, owner: &str) -> Result<Balance, StoreError> {
        self.shared
            .lock()
            .balances
            .get(owner)
            .map(|row| Balance {
                current: row.current,
                withdrawn: row.withdrawn,
            })
            .ok_or(StoreError::BalanceNotFound)
    }

    async fn list_withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, StoreError> {
        let mut entries: Vec<Withdrawal> = self
            .shared
            .lock()
            .withdrawals
            .iter()
            .filter(|w| w.user_login == owner)
            .cloned()
            .collect();

        if entries.is_empty() {
            return Err(StoreError::NoWithdrawals);
        }
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(entries)
    }
}

#[async_trait]
impl OrderStore for MemoryTx {
    async fn create_order(
        &mut self,
        owner: &str,
        number: &OrderNumber,
    ) -> Result<i64, StoreError> {
        let number = number.as_str();
        let inserted_here = self
            .ops
            .iter()
            .any(|op| matches!(op, Op::InsertOrder(o) if o.number == number));
        if inserted_here {
            return Err(StoreError::DuplicateOrder);
        }

        // Like a unique index: wait for a concurrent uncommitted insert to resolve
        let tx_id = self.id;
        let id = self
            .acquire(|state| {
                if state.orders.iter().any(|o| o.number == number) {
                    return Some(None);
                }
                match state.pending_numbers.get(number) {
                    Some(holder) if *holder != tx_id => None,
                    _ => {
                        state.next_order_id += 1;
                        state.pending_numbers.insert(number.to_string(), tx_id);
                        Some(Some(state.next_order_id))
                    }
                }
            })
            .await
            .ok_or(StoreError::DuplicateOrder)?;

        self.ops.push(Op::InsertOrder(Order {
            id,
            user_login: owner.to_string(),
            number: number.to_string(),
            status: OrderStatus::New,
            accrual: None,
            created_at: Utc::now(),
        }));
        Ok(id)
    }

    async fn find_owner(&mut self, number: &OrderNumber) -> Result<Option<String>, StoreError> {
        let number = number.as_str();
        let own = self.ops.iter().find_map(|op| match op {
            Op::InsertOrder(o) if o.number == number => Some(o.user_login.clone()),
            _ => None,
        });
        if own.is_some() {
            return Ok(own);
        }

        Ok(self
            .shared
            .lock()
            .orders
            .iter()
            .find(|o| o.number == number)
            .map(|o| o.user_login.clone()))
    }

    async fn select_for_reconciliation(&mut self, limit: usize) -> Result<Vec<Order>, StoreError> {
        let tx_id = self.id;
        let mut state = self.shared.lock();

        let mut selected: Vec<Order> = state
            .orders
            .iter()
            .filter(|o| o.status.is_pending())
            .filter(|o| {
                state
                    .order_locks
                    .get(&o.id)
                    .is_none_or(|holder| *holder == tx_id)
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        selected.truncate(limit);

        for order in &selected {
            state.order_locks.insert(order.id, tx_id);
        }
        Ok(selected)
    }

    async fn update_status_and_accrual(&mut self, order: &Order) -> Result<(), StoreError> {
        let tx_id = self.id;
        let id = order.id;
        let inserted_here = self
            .ops
            .iter()
            .any(|op| matches!(op, Op::InsertOrder(o) if o.id == id));

        let found = self
            .acquire(|state| {
                if !inserted_here && !state.orders.iter().any(|o| o.id == id) {
                    return Some(false);
                }
                match state.order_locks.get(&id) {
                    Some(holder) if *holder != tx_id => None,
                    _ => {
                        state.order_locks.insert(id, tx_id);
                        Some(true)
                    }
                }
            })
            .await;

        if !found {
            return Err(StoreError::OrderNotFound(id));
        }

        self.ops.push(Op::UpdateOrder {
            id,
            status: order.status,
            accrual: order.accrual,
        });
        Ok(())
    }
}

#[async_trait]
impl BalanceLedger for MemoryTx {
    async fn ensure_balance(&mut self, owner: &str) -> Result<(), StoreError> {
        self.lock_balance(owner).await;
        self.ops.push(Op::EnsureBalance(owner.to_string()));
        Ok(())
    }

    async fn credit_balance(&mut self, owner: &str, amount: Decimal) -> Result<(), StoreError> {
        let rejected = self.shared.lock().failing_credits.contains(owner);
        if rejected {
            return Err(StoreError::Backend(format!("credit rejected for {owner}")));
        }

        self.lock_balance(owner).await;
        if self.effective_balance(owner).is_none() {
            return Err(StoreError::BalanceNotFound);
        }

        self.ops.push(Op::Credit {
            owner: owner.to_string(),
            amount,
        });
        Ok(())
    }

    async fn debit_balance(&mut self, owner: &str, amount: Decimal) -> Result<(), StoreError> {
        self.lock_balance(owner).await;
        match self.effective_balance(owner) {
            Some(row) if row.current >= amount => {
                self.ops.push(Op::Debit {
                    owner: owner.to_string(),
                    amount,
                });
                Ok(())
            }
            _ => Err(StoreError::InsufficientFunds),
        }
    }
}

#[async_trait]
impl WithdrawalLog for MemoryTx {
    async fn record_withdrawal(
        &mut self,
        owner: &str,
        order_number: &str,
        amount: Decimal,
    ) -> Result<(), StoreError> {
        self.ops.push(Op::RecordWithdrawal(Withdrawal {
            user_login: owner.to_string(),
            order_number: order_number.to_string(),
            amount,
            created_at: Utc::now(),
        }));
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints.push(self.ops.len());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), StoreError> {
        self.savepoints
            .pop()
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend("no active savepoint".to_string()))
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
        let mark = self
            .savepoints
            .pop()
            .ok_or_else(|| StoreError::Backend("no active savepoint".to_string()))?;

        let undone: Vec<Op> = self.ops.drain(mark..).collect();
        let mut state = self.shared.lock();
        for op in undone {
            if let Op::InsertOrder(order) = op {
                state.pending_numbers.remove(&order.number);
            }
        }
        drop(state);
        self.shared.released.notify_waiters();
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        let ops = std::mem::take(&mut self.ops);
        {
            let mut state = self.shared.lock();
            for op in ops {
                match op {
                    Op::InsertOrder(order) => {
                        state.pending_numbers.remove(&order.number);
                        state.orders.push(order);
                    }
                    Op::EnsureBalance(owner) => {
                        state.balances.entry(owner).or_default();
                    }
                    Op::UpdateOrder {
                        id,
                        status,
                        accrual,
                    } => {
                        if let Some(order) = state.orders.iter_mut().find(|o| o.id == id) {
                            order.status = status;
                            order.accrual = accrual;
                        }
                    }
                    Op::Credit { owner, amount } => {
                        if let Some(row) = state.balances.get_mut(&owner) {
                            row.current += amount;
                        }
                    }
                    Op::Debit { owner, amount } => {
                        if let Some(row) = state.balances.get_mut(&owner) {
                            row.current -= amount;
                            row.withdrawn += amount;
                        }
                    }
                    Op::RecordWithdrawal(entry) => state.withdrawals.push(entry),
                }
            }
        }
        self.finish();
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.ops.clear();
        self.finish();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible_and_dropped() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.create_order("alice", &number("79927398713")).await.unwrap();
            tx.ensure_balance("alice").await.unwrap();
            assert_eq!(store.order_count(), 0);
        }
        assert_eq!(store.order_count(), 0);
        assert!(matches!(
            store.current_balance("alice").await,
            Err(StoreError::BalanceNotFound)
        ));

        // Number is free again after the drop
        let mut tx = store.begin().await.unwrap();
        tx.create_order("bob", &number("79927398713")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.find_order("79927398713").unwrap().user_login, "bob");
    }

    #[tokio::test]
    async fn test_duplicate_inside_same_transaction() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.create_order("alice", &number("79927398713")).await.unwrap();
        assert!(matches!(
            tx.create_order("alice", &number("79927398713")).await,
            Err(StoreError::DuplicateOrder)
        ));
        assert_eq!(
            tx.find_owner(&number("79927398713")).await.unwrap().as_deref(),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn test_claims_skip_rows_locked_by_other_transaction() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        for raw in ["79927398713", "12345678903", "4561261212345467"] {
            tx.create_order("alice", &number(raw)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let a = first.select_for_reconciliation(2).await.unwrap();
        let b = second.select_for_reconciliation(2).await.unwrap();
        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(b.iter().all(|o| a.iter().all(|p| p.id != o.id)));

        // Oldest first
        assert_eq!(a[0].number, "79927398713");

        drop(first);
        let mut third = store.begin().await.unwrap();
        assert_eq!(third.select_for_reconciliation(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_savepoint_rollback_discards_only_nested_work() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.ensure_balance("alice").await.unwrap();
        tx.savepoint().await.unwrap();
        tx.credit_balance("alice", dec!(5)).await.unwrap();
        tx.rollback_to_savepoint().await.unwrap();
        tx.savepoint().await.unwrap();
        tx.credit_balance("alice", dec!(7)).await.unwrap();
        tx.release_savepoint().await.unwrap();
        tx.commit().await.unwrap();

        let balance = store.current_balance("alice").await.unwrap();
        assert_eq!(balance.current, dec!(7));
        assert!(matches!(
            store.begin().await.unwrap().release_savepoint().await,
            Err(StoreError::Backend(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize_on_balance_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.ensure_balance("alice").await.unwrap();
        tx.credit_balance("alice", dec!(100)).await.unwrap();
        tx.commit().await.unwrap();

        let mut first = store.begin().await.unwrap();
        first.debit_balance("alice", dec!(80)).await.unwrap();

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut second = store.begin().await.unwrap();
                let result = second.debit_balance("alice", dec!(80)).await;
                if result.is_ok() {
                    second.commit().await.unwrap();
                }
                result
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished(), "second debit must wait for the row lock");
        first.commit().await.unwrap();

        let second = contender.await.unwrap();
        assert!(matches!(second, Err(StoreError::InsufficientFunds)));
        let balance = store.current_balance("alice").await.unwrap();
        assert_eq!(balance.current, dec!(20));
        assert_eq!(balance.withdrawn, dec!(80));
    }

    #[tokio::test]
    async fn test_credit_requires_balance_row() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        assert!(matches!(
            tx.credit_balance("nobody", dec!(1)).await,
            Err(StoreError::BalanceNotFound)
        ));
    }
}
