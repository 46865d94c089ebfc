//! 基础设施错误
//!
//! 业务错误由各服务自行定义，这里只覆盖数据库连接层。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SharedError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    /// 表结构由外部迁移工具维护，服务启动时只做存在性校验
    #[error("缺少数据表: {0}")]
    MissingTable(String),
}

pub type Result<T> = std::result::Result<T, SharedError>;

impl SharedError {
    /// 只有连接类错误值得重试，认证失败或缺表重试也无济于事
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            )
        )
    }
}
