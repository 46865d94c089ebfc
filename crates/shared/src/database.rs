//! 账本数据库连接
//!
//! 积分服务只依赖一个 PostgreSQL 连接池。表结构由外部迁移工具维护，
//! 启动时先带退避地等待数据库就绪，再确认账本所需的表都已存在。

use crate::config::DatabaseConfig;
use crate::error::{Result, SharedError};
use crate::retry::{RetryPolicy, retry_with_policy};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config), fields(max_connections = config.max_connections))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await?;

        info!("账本数据库连接池已建立");
        Ok(Self { pool })
    }

    /// 带重试地建立连接池
    ///
    /// 编排环境下数据库常晚于服务就绪，只有连接类错误会按策略退避重试
    pub async fn connect_with_retry(config: &DatabaseConfig, policy: &RetryPolicy) -> Result<Self> {
        retry_with_policy(
            policy,
            "database_connect",
            SharedError::is_retryable,
            || Self::connect(config),
        )
        .await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// 确认给定的表都存在，缺失时返回第一个缺失的表名
    pub async fn ensure_tables(&self, tables: &[&str]) -> Result<()> {
        for table in tables {
            let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                .bind(*table)
                .fetch_one(&self.pool)
                .await?;
            if !exists {
                warn!(table = %table, "账本数据表不存在，请先执行迁移");
                return Err(SharedError::MissingTable((*table).to_string()));
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("账本数据库连接池已关闭");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_missing_table_is_reported() {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        db.health_check().await.unwrap();

        match db.ensure_tables(&["gophermart_no_such_table"]).await {
            Err(SharedError::MissingTable(table)) => assert_eq!(table, "gophermart_no_such_table"),
            other => panic!("unexpected result: {other:?}"),
        }
        db.close().await;
    }
}
