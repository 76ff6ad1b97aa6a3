//! 有界并发的任务执行
//!
//! 一轮对账中每个待对账订单对应一个 [`Job`]，由 [`WorkerPool`] 的 W 个 worker 并发执行，
//! 每个 Job 恰好产生一个 [`JobResult`]。取消信号统一使用 `watch::Receiver<bool>`，
//! 值变为 `true` 即视为取消。

mod job;
mod pool;

use tokio::sync::watch;

pub use job::{Job, JobHandler, JobResult};
pub use pool::{JobQueue, PoolHandle, PoolSummary, WorkerPool};

/// 等待关闭信号变为 true
///
/// 发送端被丢弃而从未发出关闭信号时永远挂起，不会被当作取消。
pub async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let closed = shutdown.wait_for(|stop| *stop).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// 关闭信号是否已经发出
pub fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
