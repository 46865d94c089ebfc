//! 积分结算领域模型
//!
//! 订单、提现记录、用户余额以及积分金额类型

pub mod amount;
pub mod enums;
pub mod order;

pub use amount::Amount;
pub use enums::OrderStatus;
pub use order::{Balance, Order, UserId, Withdrawal};
