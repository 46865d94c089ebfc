//! 积分结算服务错误类型
//!
//! 业务上的"拒绝"（号码非法、余额不足、订单归属冲突）不走错误通道，
//! 而是作为各操作的结果枚举返回；这里只定义系统错误。

use thiserror::Error;

/// 积分结算服务错误类型
#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 积分结算服务 Result 类型别名
pub type Result<T> = std::result::Result<T, AccrualError>;

impl AccrualError {
    /// 获取错误码（供 HTTP 层映射，也作为日志字段）
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
