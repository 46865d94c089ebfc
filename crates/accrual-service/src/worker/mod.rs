pub mod pool;
pub mod reconciler;
pub mod recovery;
pub mod throttle;

pub use pool::ReconciliationWorkerPool;
pub use reconciler::{
    Disposition, OrderReconciler, ReconcilerSettings, RetryReason, UnknownOrderPolicy,
};
pub use recovery::RecoverySweeper;
pub use throttle::PollThrottle;
