//! 进程内账本存储
//!
//! 所有状态放在一把互斥锁后面，每个操作持锁完成，
//! 从而具备与 PostgreSQL 实现相同的原子性语义。用于测试与本地调试。

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{ClaimOutcome, InsertOrderOutcome, LedgerStore, StoreWithdrawOutcome};
use crate::error::{AccrualError, Result};
use crate::models::{Amount, Balance, Order, OrderStatus, UserId, Withdrawal};

#[derive(Debug, Clone)]
struct Claim {
    worker: Uuid,
    until: DateTime<Utc>,
}

impl Claim {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

#[derive(Debug, Clone)]
struct OrderRow {
    order: Order,
    claim: Option<Claim>,
}

#[derive(Debug, Default)]
struct State {
    orders: HashMap<String, OrderRow>,
    balances: HashMap<UserId, Balance>,
    withdrawals: Vec<Withdrawal>,
    withdrawal_refs: HashSet<String>,
    next_withdrawal_id: i64,
}

/// 进程内账本存储
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<State>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接写入一条认领记录，用于模拟崩溃实例遗留的租约
    pub fn force_claim(&self, number: &str, worker: Uuid, until: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.orders.get_mut(number) {
            Some(row) => {
                row.claim = Some(Claim { worker, until });
                true
            }
            None => false,
        }
    }

    /// 直接设置订单状态，用于构造恢复场景
    pub fn force_status(&self, number: &str, status: OrderStatus) -> bool {
        let mut state = self.state.lock();
        match state.orders.get_mut(number) {
            Some(row) => {
                row.order.status = status;
                true
            }
            None => false,
        }
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().orders.len()
    }

    /// 当前认领者（租约未过期时）
    pub fn claim_holder(&self, number: &str) -> Option<Uuid> {
        let now = Utc::now();
        self.state
            .lock()
            .orders
            .get(number)
            .and_then(|row| row.claim.as_ref())
            .filter(|c| c.is_live(now))
            .map(|c| c.worker)
    }
}

fn lease_deadline(now: DateTime<Utc>, lease: Duration) -> Result<DateTime<Utc>> {
    let lease = chrono::Duration::from_std(lease)
        .map_err(|e| AccrualError::Internal(format!("租约时长非法: {e}")))?;
    Ok(now + lease)
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_order(&self, number: &str, user_id: UserId) -> Result<InsertOrderOutcome> {
        let mut state = self.state.lock();
        if let Some(row) = state.orders.get(number) {
            return Ok(InsertOrderOutcome::Existing(row.order.clone()));
        }

        let order = Order::new(number, user_id);
        state.orders.insert(
            number.to_string(),
            OrderRow {
                order: order.clone(),
                claim: None,
            },
        );
        Ok(InsertOrderOutcome::Inserted(order))
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        Ok(self
            .state
            .lock()
            .orders
            .get(number)
            .map(|row| row.order.clone()))
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|row| row.order.user_id == user_id)
            .map(|row| row.order.clone())
            .collect();
        orders.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        Ok(orders)
    }

    async fn list_unfinished_orders(
        &self,
        after: Option<String>,
        limit: i64,
        include_claimed: bool,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let state = self.state.lock();
        let mut numbers: Vec<String> = state
            .orders
            .values()
            .filter(|row| !row.order.status.is_terminal())
            .filter(|row| include_claimed || !row.claim.as_ref().is_some_and(|c| c.is_live(now)))
            .filter(|row| after.as_deref().is_none_or(|a| row.order.number.as_str() > a))
            .map(|row| row.order.number.clone())
            .collect();
        numbers.sort();
        numbers.truncate(limit.max(0) as usize);
        Ok(numbers)
    }

    async fn claim_order(
        &self,
        number: &str,
        worker: Uuid,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        let now = Utc::now();
        let until = lease_deadline(now, lease)?;
        let mut state = self.state.lock();

        let Some(row) = state.orders.get_mut(number) else {
            return Ok(ClaimOutcome::NotFound);
        };
        if row.order.status.is_terminal() {
            return Ok(ClaimOutcome::Terminal(row.order.status));
        }
        if let Some(claim) = &row.claim {
            if claim.is_live(now) && claim.worker != worker {
                return Ok(ClaimOutcome::Busy);
            }
        }

        row.claim = Some(Claim { worker, until });
        Ok(ClaimOutcome::Claimed(row.order.clone()))
    }

    async fn release_claim(&self, number: &str, worker: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(row) = state.orders.get_mut(number) {
            if row.claim.as_ref().is_some_and(|c| c.worker == worker) {
                row.claim = None;
            }
        }
        Ok(())
    }

    async fn mark_processing(&self, number: &str, worker: Uuid) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(row) = state.orders.get_mut(number) else {
            return Ok(false);
        };

        let moved = row.order.status == OrderStatus::New;
        if moved {
            row.order.status = OrderStatus::Processing;
        }
        if row.claim.as_ref().is_some_and(|c| c.worker == worker) {
            row.claim = None;
        }
        Ok(moved)
    }

    async fn mark_invalid(&self, number: &str) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(row) = state.orders.get_mut(number) else {
            return Ok(false);
        };
        if row.order.status.is_terminal() {
            return Ok(false);
        }

        row.order.status = OrderStatus::Invalid;
        row.order.accrual = None;
        row.claim = None;
        Ok(true)
    }

    async fn apply_accrual(&self, number: &str, accrual: Amount) -> Result<bool> {
        let mut state = self.state.lock();
        let user_id = match state.orders.get(number) {
            Some(row) if !row.order.status.is_terminal() => row.order.user_id,
            _ => return Ok(false),
        };

        let balance = state.balances.entry(user_id).or_default();
        let credited = balance
            .current
            .checked_add(accrual)
            .ok_or_else(|| AccrualError::Internal(format!("用户 {user_id} 余额溢出")))?;
        balance.current = credited;

        if let Some(row) = state.orders.get_mut(number) {
            row.order.status = OrderStatus::Processed;
            row.order.accrual = Some(accrual);
            row.claim = None;
        }
        Ok(true)
    }

    async fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        Ok(self
            .state
            .lock()
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn withdraw(
        &self,
        user_id: UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<StoreWithdrawOutcome> {
        let mut state = self.state.lock();
        if state.withdrawal_refs.contains(order_ref) {
            return Ok(StoreWithdrawOutcome::DuplicateReference);
        }

        let balance = state.balances.get(&user_id).copied().unwrap_or_default();
        let Some(current) = balance
            .current
            .checked_sub(amount)
            .filter(|rest| !rest.is_negative())
        else {
            return Ok(StoreWithdrawOutcome::InsufficientFunds);
        };
        let withdrawn = balance
            .withdrawn
            .checked_add(amount)
            .ok_or_else(|| AccrualError::Internal(format!("用户 {user_id} 提现累计溢出")))?;

        state.balances.insert(
            user_id,
            Balance {
                current,
                withdrawn,
            },
        );

        state.next_withdrawal_id += 1;
        let withdrawal = Withdrawal {
            id: state.next_withdrawal_id,
            user_id,
            order_ref: order_ref.to_string(),
            amount,
            processed_at: Utc::now(),
        };
        state.withdrawal_refs.insert(order_ref.to_string());
        state.withdrawals.push(withdrawal.clone());

        Ok(StoreWithdrawOutcome::Applied(withdrawal))
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        Ok(self
            .state
            .lock()
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
