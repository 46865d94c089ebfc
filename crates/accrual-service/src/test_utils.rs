//! 测试辅助
//!
//! 集成测试与本地调试共用的脚本化积分客户端和订单号生成器。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::accrual_client::{AccrualClient, AccrualClientError, AccrualReply, AccrualStatus};
use crate::luhn;
use crate::models::Amount;

pub type ScriptedReply = Result<AccrualStatus, AccrualClientError>;

#[derive(Default)]
struct Script {
    replies: VecDeque<ScriptedReply>,
    /// 脚本耗尽后重复最后一条
    last: Option<ScriptedReply>,
    calls: usize,
}

/// 按订单预设回复序列的积分客户端
///
/// 未设置脚本的订单返回 `UnknownOrder`
#[derive(Default)]
pub struct ScriptedAccrualClient {
    scripts: Mutex<HashMap<String, Script>>,
    total_calls: AtomicUsize,
}

impl ScriptedAccrualClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加若干条回复
    pub fn script(
        &self,
        order_number: &str,
        replies: impl IntoIterator<Item = ScriptedReply>,
    ) -> &Self {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(order_number.to_string()).or_default();
        script.replies.extend(replies);
        self
    }

    /// 先返回 `pending` 次 PROCESSING，再返回 PROCESSED
    pub fn processed_after(&self, order_number: &str, pending: usize, accrual: Amount) -> &Self {
        let replies = std::iter::repeat_n(Ok(AccrualStatus::Processing), pending)
            .chain(std::iter::once(Ok(AccrualStatus::Processed { accrual })));
        self.script(order_number, replies)
    }

    pub fn calls_for(&self, order_number: &str) -> usize {
        self.scripts
            .lock()
            .get(order_number)
            .map(|s| s.calls)
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AccrualClient for ScriptedAccrualClient {
    async fn query(&self, order_number: &str) -> Result<AccrualReply, AccrualClientError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);

        let next = {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(order_number.to_string()).or_default();
            script.calls += 1;
            match script.replies.pop_front() {
                Some(reply) => {
                    script.last = Some(reply.clone());
                    reply
                }
                None => script
                    .last
                    .clone()
                    .unwrap_or(Err(AccrualClientError::UnknownOrder)),
            }
        };

        next.map(|status| AccrualReply {
            order: order_number.to_string(),
            status,
        })
    }
}

/// 生成唯一且通过 Luhn 校验的订单号
pub fn luhn_number(seed: u64) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let serial = COUNTER.fetch_add(1, Ordering::Relaxed);
    let payload = format!("{seed}{serial:06}");
    let digit = luhn::check_digit(&payload).unwrap_or(0);
    format!("{payload}{digit}")
}
