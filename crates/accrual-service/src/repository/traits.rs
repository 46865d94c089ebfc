//! 账本存储 Trait 定义

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{Amount, Balance, Order, OrderStatus, UserId, Withdrawal};

/// 插入订单的结果
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOrderOutcome {
    /// 新建成功
    Inserted(Order),
    /// 订单号已存在，返回已有记录（归属不变）
    Existing(Order),
}

/// 认领订单的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// 认领成功，租约期内只有当前 Worker 会查询外部系统
    Claimed(Order),
    /// 订单已是终态
    Terminal(OrderStatus),
    /// 被其他仍在租约内的 Worker 持有
    Busy,
    NotFound,
}

/// 存储层提现结果
#[derive(Debug, Clone, PartialEq)]
pub enum StoreWithdrawOutcome {
    Applied(Withdrawal),
    /// 余额不足，未写入任何数据
    InsufficientFunds,
    /// 提现单号已被使用
    DuplicateReference,
}

/// 账本存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // 订单
    async fn insert_order(&self, number: &str, user_id: UserId) -> Result<InsertOrderOutcome>;
    async fn get_order(&self, number: &str) -> Result<Option<Order>>;
    /// 按上传时间升序
    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>>;
    /// 按订单号分页列出未终结的订单
    ///
    /// `include_claimed` 为 false 时跳过认领租约仍有效的订单
    async fn list_unfinished_orders(
        &self,
        after: Option<String>,
        limit: i64,
        include_claimed: bool,
    ) -> Result<Vec<String>>;

    // 认领与状态迁移（全部以"尚未终态"为前提）
    async fn claim_order(&self, number: &str, worker: Uuid, lease: Duration)
    -> Result<ClaimOutcome>;
    async fn release_claim(&self, number: &str, worker: Uuid) -> Result<()>;
    /// NEW -> PROCESSING，同时释放认领；返回是否发生了迁移
    async fn mark_processing(&self, number: &str, worker: Uuid) -> Result<bool>;
    async fn mark_invalid(&self, number: &str) -> Result<bool>;
    /// 单事务：置 PROCESSED、写入 accrual、给订单归属用户入账
    ///
    /// 订单已是终态时不做任何修改并返回 false
    async fn apply_accrual(&self, number: &str, accrual: Amount) -> Result<bool>;

    // 余额与提现
    async fn get_balance(&self, user_id: UserId) -> Result<Balance>;
    async fn withdraw(
        &self,
        user_id: UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<StoreWithdrawOutcome>;
    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>>;
}
