//! 余额与提现服务

use std::sync::Arc;

use gophermart_shared::observability::metrics as obs_metrics;
use tracing::{info, instrument};

use crate::error::Result;
use crate::luhn;
use crate::models::{Amount, Balance, Order, UserId, Withdrawal};
use crate::repository::{LedgerStore, StoreWithdrawOutcome};
use crate::service::dto::{RejectReason, WithdrawOutcome};

/// 用户侧读写账本的入口
///
/// 余额读取与提现直接访问存储，不经过对账队列
pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        self.store.get_balance(user_id).await
    }

    /// 用户提交过的订单，按上传时间升序
    pub async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        self.store.list_orders(user_id).await
    }

    pub async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        self.store.list_withdrawals(user_id).await
    }

    /// 用积分抵扣一笔订单
    ///
    /// 余额检查、记录写入与扣减在同一个存储事务内完成，
    /// 同一用户的并发提现被串行化
    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        user_id: UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome> {
        let outcome = self.withdraw_inner(user_id, order_ref, amount).await?;
        obs_metrics::record_withdrawal(outcome.label());
        Ok(outcome)
    }

    async fn withdraw_inner(
        &self,
        user_id: UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<WithdrawOutcome> {
        if !amount.is_positive() {
            return Ok(WithdrawOutcome::Rejected(RejectReason::NonPositiveAmount));
        }
        let Some(order_ref) = luhn::normalize(order_ref).filter(|n| luhn::is_valid(n)) else {
            return Ok(WithdrawOutcome::Rejected(RejectReason::InvalidNumber));
        };

        let outcome = match self.store.withdraw(user_id, order_ref, amount).await? {
            StoreWithdrawOutcome::Applied(withdrawal) => {
                info!(user_id, order = %order_ref, amount = %amount, "提现成功");
                WithdrawOutcome::Accepted(withdrawal)
            }
            StoreWithdrawOutcome::InsufficientFunds => {
                info!(user_id, order = %order_ref, amount = %amount, "余额不足，提现被拒绝");
                WithdrawOutcome::InsufficientFunds
            }
            StoreWithdrawOutcome::DuplicateReference => {
                WithdrawOutcome::Rejected(RejectReason::DuplicateReference)
            }
        };
        Ok(outcome)
    }
}
