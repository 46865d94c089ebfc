//! 账本存储层
//!
//! 订单、用户余额与提现记录的持久化。所有读-改-写都在单个存储操作内原子完成，
//! 服务层与 Worker 只依赖 [`LedgerStore`] trait。
//!
//! - [`PgLedgerStore`]：PostgreSQL 实现，生产使用
//! - [`MemoryLedgerStore`]：进程内实现，测试与本地调试使用

mod ledger_repo;
mod memory_store;
mod traits;

pub use ledger_repo::PgLedgerStore;
pub use memory_store::MemoryLedgerStore;
pub use traits::*;
