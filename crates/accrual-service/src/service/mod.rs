//! 服务层
//!
//! 供上层 HTTP 模块调用的同步操作入口。
//!
//! ## 模块结构
//!
//! - `dto`: 各操作的结果枚举
//! - `admission_service`: 订单准入（Luhn 校验、去重、入队）
//! - `balance_service`: 余额、提现与列表查询

pub mod admission_service;
pub mod balance_service;
pub mod dto;

pub use admission_service::OrderAdmissionGate;
pub use balance_service::BalanceService;
pub use dto::*;
