//! 订单准入
//!
//! 1. 规范化并做 Luhn 校验 -> 2. 存储层"不存在则插入" -> 3. 新订单入队
//!
//! 插入成功但入队前进程退出的订单，由启动恢复扫描重新入队。

use std::sync::Arc;

use gophermart_shared::observability::metrics as obs_metrics;
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::luhn;
use crate::models::UserId;
use crate::queue::ReconciliationQueue;
use crate::repository::{InsertOrderOutcome, LedgerStore};
use crate::service::dto::{AdmissionOutcome, RejectReason};

pub struct OrderAdmissionGate {
    store: Arc<dyn LedgerStore>,
    queue: ReconciliationQueue,
}

impl OrderAdmissionGate {
    pub fn new(store: Arc<dyn LedgerStore>, queue: ReconciliationQueue) -> Self {
        Self { store, queue }
    }

    /// 提交订单号
    #[instrument(skip(self))]
    pub async fn admit(&self, order_number: &str, user_id: UserId) -> Result<AdmissionOutcome> {
        let outcome = self.admit_inner(order_number, user_id).await?;
        obs_metrics::record_admission(outcome.label());
        Ok(outcome)
    }

    async fn admit_inner(&self, order_number: &str, user_id: UserId) -> Result<AdmissionOutcome> {
        let Some(number) = luhn::normalize(order_number).filter(|n| luhn::is_valid(n)) else {
            debug!(user_id, "订单号格式非法");
            return Ok(AdmissionOutcome::Rejected(RejectReason::InvalidNumber));
        };

        match self.store.insert_order(number, user_id).await? {
            InsertOrderOutcome::Inserted(order) => {
                self.queue.enqueue(&order.number);
                info!(order = %order.number, user_id, "新订单已接收");
                Ok(AdmissionOutcome::Accepted(order))
            }
            InsertOrderOutcome::Existing(order) if order.user_id == user_id => {
                Ok(AdmissionOutcome::AlreadyOwnedBySelf(order))
            }
            InsertOrderOutcome::Existing(order) => {
                info!(order = %order.number, user_id, owner = order.user_id, "订单号已被其他用户提交");
                Ok(AdmissionOutcome::OwnedByOther)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccrualError;
    use crate::models::{Order, OrderStatus};
    use crate::repository::{MemoryLedgerStore, MockLedgerStore};

    fn gate() -> (OrderAdmissionGate, Arc<MemoryLedgerStore>, ReconciliationQueue) {
        let store = Arc::new(MemoryLedgerStore::new());
        let queue = ReconciliationQueue::new();
        (
            OrderAdmissionGate::new(store.clone(), queue.clone()),
            store,
            queue,
        )
    }

    #[tokio::test]
    async fn test_accepts_valid_number_and_enqueues() {
        let (gate, _store, queue) = gate();

        match gate.admit("12345678903\n", 1).await.unwrap() {
            AdmissionOutcome::Accepted(order) => {
                assert_eq!(order.number, "12345678903");
                assert_eq!(order.status, OrderStatus::New);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(queue.contains("12345678903"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_numbers() {
        let (gate, store, queue) = gate();

        for raw in ["79927398710", "", "12a45", "  "] {
            assert_eq!(
                gate.admit(raw, 1).await.unwrap(),
                AdmissionOutcome::Rejected(RejectReason::InvalidNumber)
            );
        }
        assert_eq!(store.order_count(), 0);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_submissions() {
        let (gate, store, queue) = gate();
        gate.admit("79927398713", 1).await.unwrap();
        queue.complete("79927398713");

        assert!(matches!(
            gate.admit("79927398713", 1).await.unwrap(),
            AdmissionOutcome::AlreadyOwnedBySelf(_)
        ));
        assert_eq!(
            gate.admit("79927398713", 2).await.unwrap(),
            AdmissionOutcome::OwnedByOther
        );

        let order = store.get_order("79927398713").await.unwrap().unwrap();
        assert_eq!(order.user_id, 1);
        assert_eq!(store.order_count(), 1);
        // 重复提交不入队
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_storage_error_is_propagated() {
        let mut store = MockLedgerStore::new();
        store
            .expect_insert_order()
            .returning(|_, _| Err(AccrualError::Database(sqlx::Error::PoolTimedOut)));

        let gate = OrderAdmissionGate::new(Arc::new(store), ReconciliationQueue::new());
        let err = gate.admit("12345678903", 1).await.unwrap_err();
        assert_eq!(err.error_code(), "DATABASE_ERROR");
    }

    #[tokio::test]
    async fn test_store_receives_normalized_number() {
        let mut store = MockLedgerStore::new();
        store
            .expect_insert_order()
            .withf(|number, user_id| number == "12345678903" && *user_id == 9)
            .times(1)
            .returning(|number, user_id| Ok(InsertOrderOutcome::Inserted(Order::new(number, user_id))));

        let gate = OrderAdmissionGate::new(Arc::new(store), ReconciliationQueue::new());
        gate.admit("  12345678903\r\n", 9).await.unwrap();
    }
}
