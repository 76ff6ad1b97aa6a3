//! 积分对账调度器
//!
//! 按固定间隔触发一轮对账（sweep）：读取全部待对账订单，交给 worker 池并发查询积分服务，
//! 收集每个任务的结果。一轮未结束时到期的 tick 直接跳过，任何时刻最多只有一轮在执行。
//! 单轮失败只记录日志，下一次 tick 重新尝试。

use std::sync::Arc;
use std::time::{Duration, Instant};

use loyalty_shared::observability::metrics;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::AccrualError;
use crate::models::OrderNumber;
use crate::source::OrderSource;
use crate::worker::{Job, JobHandler, JobResult, WorkerPool, cancelled, is_cancelled};

const WORKER_NAME: &str = "accrual_scheduler";

/// 一轮对账的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// 本轮读取到的待对账订单数
    pub pending: usize,
    /// 实际投递到任务队列的任务数
    pub dispatched: usize,
    pub results: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl SweepReport {
    fn record(&mut self, result: &JobResult, numbers: &[OrderNumber]) {
        self.results += 1;

        let Some(err) = &result.error else {
            self.succeeded += 1;
            return;
        };

        if err.is_cancelled() {
            self.cancelled += 1;
            return;
        }

        self.failed += 1;
        match result.descriptor.and_then(|d| numbers.get(d)) {
            Some(order) => warn!(order = %order, error = %err, "订单对账失败，保持待处理状态"),
            None => warn!(error = %err, "对账任务失败"),
        }
    }

    fn status(&self) -> &'static str {
        if self.cancelled > 0 {
            "cancelled"
        } else if self.failed > 0 {
            "partial"
        } else {
            "completed"
        }
    }
}

/// 积分对账调度器
pub struct AccrualScheduler {
    source: Arc<dyn OrderSource>,
    handler: Arc<dyn JobHandler>,
    interval: Duration,
    workers: usize,
}

impl AccrualScheduler {
    pub fn new(
        source: Arc<dyn OrderSource>,
        handler: Arc<dyn JobHandler>,
        interval: Duration,
        workers: usize,
    ) -> Self {
        Self {
            source,
            handler,
            interval,
            workers: workers.max(1),
        }
    }

    /// 主循环：每个间隔执行一轮对账，直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.interval,
            workers = self.workers,
            "积分对账调度器已启动"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // 第一次 tick 立即完成，第一轮在一个间隔之后开始
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = cancelled(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            match self.sweep(&shutdown).await {
                Ok(report) if report.pending > 0 => info!(
                    pending = report.pending,
                    dispatched = report.dispatched,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    cancelled = report.cancelled,
                    "本轮对账完成"
                ),
                Ok(_) => debug!("没有待对账订单"),
                Err(e) => error!(error = %e, "本轮对账失败，等待下一轮"),
            }

            metrics::set_worker_last_run(WORKER_NAME);

            if is_cancelled(&shutdown) {
                break;
            }
        }

        info!("积分对账调度器已停止");
    }

    /// 执行一轮完整的对账
    ///
    /// 读取待对账订单失败时只放弃本轮并返回错误。
    pub async fn sweep(&self, shutdown: &watch::Receiver<bool>) -> Result<SweepReport, AccrualError> {
        let started = Instant::now();

        let pending = match self.source.list_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                metrics::record_sweep("error", None, started.elapsed().as_secs_f64());
                return Err(e.into());
            }
        };

        let mut report = SweepReport {
            pending: pending.len(),
            ..SweepReport::default()
        };
        if pending.is_empty() {
            metrics::record_sweep(report.status(), Some(0), started.elapsed().as_secs_f64());
            return Ok(report);
        }

        // descriptor 即订单在本轮快照中的下标
        let numbers: Vec<OrderNumber> = pending.iter().map(|o| o.number).collect();
        let jobs: Vec<Job> = pending
            .into_iter()
            .enumerate()
            .map(|(descriptor, order)| Job::new(descriptor, order, self.handler.clone()))
            .collect();

        debug!(pending = report.pending, workers = self.workers, "开始本轮对账");

        let (pool, queue) = WorkerPool::new(self.workers);
        let mut handle = pool.run(shutdown.clone());
        let producer = tokio::spawn(queue.submit(jobs, shutdown.clone()));

        while let Some(result) = handle.next_result().await {
            report.record(&result, &numbers);
        }

        if handle.completed().await.is_none() {
            warn!("worker 池未发出完成信号");
        }

        report.dispatched = match producer.await {
            Ok(submitted) => submitted,
            Err(e) => {
                error!(error = %e, "任务投递异常结束");
                0
            }
        };

        metrics::record_sweep(
            report.status(),
            Some(report.pending),
            started.elapsed().as_secs_f64(),
        );
        Ok(report)
    }
}
