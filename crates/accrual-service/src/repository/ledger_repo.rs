//! PostgreSQL 账本存储
//!
//! 依赖的表结构：
//!
//! ```sql
//! CREATE TABLE orders (
//!     number        TEXT PRIMARY KEY,
//!     user_id       BIGINT NOT NULL,
//!     status        VARCHAR(16) NOT NULL,
//!     accrual       BIGINT,
//!     uploaded_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     claimed_by    UUID,
//!     claimed_until TIMESTAMPTZ
//! );
//! CREATE TABLE user_balances (
//!     user_id   BIGINT PRIMARY KEY,
//!     current   BIGINT NOT NULL DEFAULT 0 CHECK (current >= 0),
//!     withdrawn BIGINT NOT NULL DEFAULT 0
//! );
//! CREATE TABLE withdrawals (
//!     id           BIGSERIAL PRIMARY KEY,
//!     user_id      BIGINT NOT NULL,
//!     order_ref    TEXT NOT NULL UNIQUE,
//!     amount       BIGINT NOT NULL CHECK (amount > 0),
//!     processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```
//!
//! 金额列以"分"为单位存储。

use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::traits::{ClaimOutcome, InsertOrderOutcome, LedgerStore, StoreWithdrawOutcome};
use crate::error::{AccrualError, Result};
use crate::models::{Amount, Balance, Order, OrderStatus, UserId, Withdrawal};

const ORDER_COLUMNS: &str = "number, user_id, status, accrual, uploaded_at";

/// PostgreSQL 账本存储
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// 启动时需要校验存在的表
    pub const REQUIRED_TABLES: &[&str] = &["orders", "user_balances", "withdrawals"];

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    #[instrument(skip(self))]
    async fn insert_order(&self, number: &str, user_id: UserId) -> Result<InsertOrderOutcome> {
        let inserted = sqlx::query_as::<_, Order>(&format!(
            r#"
            INSERT INTO orders (number, user_id, status, uploaded_at, updated_at)
            VALUES ($1, $2, 'NEW', NOW(), NOW())
            ON CONFLICT (number) DO NOTHING
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(number)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(order) = inserted {
            return Ok(InsertOrderOutcome::Inserted(order));
        }

        // 订单从不删除，冲突意味着已有记录
        let existing = self.get_order(number).await?.ok_or_else(|| {
            AccrualError::Internal(format!("订单 {number} 插入冲突但查询不到已有记录"))
        })?;
        Ok(InsertOrderOutcome::Existing(existing))
    }

    async fn get_order(&self, number: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE number = $1"
        ))
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn list_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at ASC, number ASC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn list_unfinished_orders(
        &self,
        after: Option<String>,
        limit: i64,
        include_claimed: bool,
    ) -> Result<Vec<String>> {
        let numbers = sqlx::query_scalar::<_, String>(
            r#"
            SELECT number
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
              AND ($1::TEXT IS NULL OR number > $1)
              AND ($3 OR claimed_until IS NULL OR claimed_until < NOW())
            ORDER BY number ASC
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .bind(include_claimed)
        .fetch_all(&self.pool)
        .await?;

        Ok(numbers)
    }

    #[instrument(skip(self))]
    async fn claim_order(
        &self,
        number: &str,
        worker: Uuid,
        lease: Duration,
    ) -> Result<ClaimOutcome> {
        // 同一 Worker 可以续约自己的认领
        let claimed = sqlx::query_as::<_, Order>(&format!(
            r#"
            UPDATE orders
            SET claimed_by = $2,
                claimed_until = NOW() + make_interval(secs => $3),
                updated_at = NOW()
            WHERE number = $1
              AND status IN ('NEW', 'PROCESSING')
              AND (claimed_until IS NULL OR claimed_until < NOW() OR claimed_by = $2)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(number)
        .bind(worker)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(order) = claimed {
            return Ok(ClaimOutcome::Claimed(order));
        }

        let status =
            sqlx::query_scalar::<_, OrderStatus>("SELECT status FROM orders WHERE number = $1")
                .bind(number)
                .fetch_optional(&self.pool)
                .await?;

        Ok(match status {
            None => ClaimOutcome::NotFound,
            Some(s) if s.is_terminal() => ClaimOutcome::Terminal(s),
            Some(_) => ClaimOutcome::Busy,
        })
    }

    async fn release_claim(&self, number: &str, worker: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET claimed_by = NULL, claimed_until = NULL
            WHERE number = $1 AND claimed_by = $2
            "#,
        )
        .bind(number)
        .bind(worker)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_processing(&self, number: &str, worker: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'PROCESSING', updated_at = NOW()
            WHERE number = $1 AND status = 'NEW'
            "#,
        )
        .bind(number)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE orders
            SET claimed_by = NULL, claimed_until = NULL
            WHERE number = $1 AND claimed_by = $2
            "#,
        )
        .bind(number)
        .bind(worker)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn mark_invalid(&self, number: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'INVALID', accrual = NULL,
                claimed_by = NULL, claimed_until = NULL,
                updated_at = NOW()
            WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
            "#,
        )
        .bind(number)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn apply_accrual(&self, number: &str, accrual: Amount) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // 条件更新是入账恰好一次的关键：已终态的订单不会再次命中
        let owner = sqlx::query_scalar::<_, UserId>(
            r#"
            UPDATE orders
            SET status = 'PROCESSED', accrual = $2,
                claimed_by = NULL, claimed_until = NULL,
                updated_at = NOW()
            WHERE number = $1 AND status IN ('NEW', 'PROCESSING')
            RETURNING user_id
            "#,
        )
        .bind(number)
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            tx.rollback().await?;
            debug!(order = %number, "订单已终态，跳过入账");
            return Ok(false);
        };

        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, current, withdrawn)
            VALUES ($1, $2, 0)
            ON CONFLICT (user_id)
            DO UPDATE SET current = user_balances.current + EXCLUDED.current
            "#,
        )
        .bind(user_id)
        .bind(accrual)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn get_balance(&self, user_id: UserId) -> Result<Balance> {
        let balance = sqlx::query_as::<_, Balance>(
            "SELECT current, withdrawn FROM user_balances WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn withdraw(
        &self,
        user_id: UserId,
        order_ref: &str,
        amount: Amount,
    ) -> Result<StoreWithdrawOutcome> {
        let mut tx = self.pool.begin().await?;

        // 确保余额行存在，再加行锁串行化同一用户的提现
        sqlx::query(
            r#"
            INSERT INTO user_balances (user_id, current, withdrawn)
            VALUES ($1, 0, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let current = sqlx::query_scalar::<_, Amount>(
            "SELECT current FROM user_balances WHERE user_id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, Withdrawal>(
            r#"
            INSERT INTO withdrawals (user_id, order_ref, amount, processed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (order_ref) DO NOTHING
            RETURNING id, user_id, order_ref, amount, processed_at
            "#,
        )
        .bind(user_id)
        .bind(order_ref)
        .bind(amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(withdrawal) = inserted else {
            tx.rollback().await?;
            return Ok(StoreWithdrawOutcome::DuplicateReference);
        };

        if current < amount {
            tx.rollback().await?;
            return Ok(StoreWithdrawOutcome::InsufficientFunds);
        }

        sqlx::query(
            r#"
            UPDATE user_balances
            SET current = current - $2, withdrawn = withdrawn + $2
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(StoreWithdrawOutcome::Applied(withdrawal))
    }

    async fn list_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let withdrawals = sqlx::query_as::<_, Withdrawal>(
            r#"
            SELECT id, user_id, order_ref, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at ASC, id ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(withdrawals)
    }
}
