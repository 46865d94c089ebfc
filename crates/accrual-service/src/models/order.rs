//! 订单、提现与余额实体定义

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::amount::Amount;
use super::enums::OrderStatus;

/// 用户标识，由上层鉴权模块给出，这里视为不透明值
pub type UserId = i64;

/// 用户提交的订单
///
/// 订单号全局唯一，归属用户一经写入不再变更
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Order {
    pub number: String,
    #[serde(skip)]
    pub user_id: UserId,
    pub status: OrderStatus,
    /// 仅 PROCESSED 状态携带
    #[serde(skip_serializing_if = "Option::is_none")]
    #[sqlx(default)]
    pub accrual: Option<Amount>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    pub fn new(number: impl Into<String>, user_id: UserId) -> Self {
        Self {
            number: number.into(),
            user_id,
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }
}

/// 提现（积分抵扣）记录
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Withdrawal {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub user_id: UserId,
    /// 抵扣对应的订单号
    #[serde(rename = "order")]
    pub order_ref: String,
    #[serde(rename = "sum")]
    pub amount: Amount,
    pub processed_at: DateTime<Utc>,
}

/// 用户积分余额
///
/// `current` 为可用余额，`withdrawn` 为累计已提现
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Balance {
    pub current: Amount,
    pub withdrawn: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_json_omits_accrual_until_processed() {
        let mut order = Order::new("12345678903", 7);
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["number"], "12345678903");
        assert_eq!(json["status"], "NEW");
        assert!(json.get("accrual").is_none());
        assert!(json.get("user_id").is_none());

        order.status = OrderStatus::Processed;
        order.accrual = Some(Amount::from_minor(50_000));
        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["accrual"], 500.0);
    }

    #[test]
    fn test_withdrawal_json_field_names() {
        let withdrawal = Withdrawal {
            id: 1,
            user_id: 7,
            order_ref: "2377225624".to_string(),
            amount: Amount::from_minor(75_100),
            processed_at: Utc::now(),
        };
        let json = serde_json::to_value(&withdrawal).unwrap();
        assert_eq!(json["order"], "2377225624");
        assert_eq!(json["sum"], 751.0);
        assert!(json.get("id").is_none());
    }
}
