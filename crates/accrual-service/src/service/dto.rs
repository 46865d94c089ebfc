//! 服务层结果类型
//!
//! 业务拒绝以枚举变体返回，上层按变体映射 HTTP 状态码

use crate::models::{Order, Withdrawal};

/// 拒绝原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// 号码为空、含非数字字符或未通过 Luhn 校验
    InvalidNumber,
    /// 提现金额不大于 0
    NonPositiveAmount,
    /// 提现单号已被使用
    DuplicateReference,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidNumber => "invalid_number",
            Self::NonPositiveAmount => "non_positive_amount",
            Self::DuplicateReference => "duplicate_reference",
        }
    }
}

/// 订单提交结果
///
/// `label` 用作指标标签，拒绝时细分到具体原因
#[derive(Debug, Clone, PartialEq)]
pub enum AdmissionOutcome {
    /// 新订单，已入队
    Accepted(Order),
    /// 当前用户此前已提交过
    AlreadyOwnedBySelf(Order),
    /// 订单号属于其他用户
    OwnedByOther,
    Rejected(RejectReason),
}

impl AdmissionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::AlreadyOwnedBySelf(_) => "already_owned",
            Self::OwnedByOther => "owned_by_other",
            Self::Rejected(reason) => reason.as_str(),
        }
    }
}

/// 提现结果
#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawOutcome {
    Accepted(Withdrawal),
    InsufficientFunds,
    Rejected(RejectReason),
}

impl WithdrawOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::InsufficientFunds => "insufficient_funds",
            Self::Rejected(reason) => reason.as_str(),
        }
    }
}
