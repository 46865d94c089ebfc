//! 订单状态枚举
//!
//! 同时支持数据库（sqlx）和 JSON（serde）序列化

use serde::{Deserialize, Serialize};

/// 订单对账状态
///
/// 状态只会前进：NEW -> PROCESSING -> {INVALID | PROCESSED}，
/// NEW 也可以直接进入终态。终态不可再变更。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已接收，尚未从外部系统得到结论
    #[default]
    New,
    /// 外部系统已受理，计算中
    Processing,
    /// 外部系统拒绝计算积分（终态）
    Invalid,
    /// 积分计算完成并已入账（终态）
    Processed,
}

impl OrderStatus {
    /// 是否为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Invalid | Self::Processed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed => "PROCESSED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
