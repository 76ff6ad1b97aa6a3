//! 固定大小的 worker 池
//!
//! - 任务队列容量为 W：投递方在 worker 消费前最多领先 W 个任务
//! - 结果通道容量为 W：结果不会被丢弃，消费方处理慢时 worker 等待
//! - 全部 worker 退出后结果通道关闭，完成信号只发出一次

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use super::job::{Job, JobResult};
use super::cancelled;

/// 池的运行汇总
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSummary {
    pub workers: usize,
    /// 所有 worker 发出的结果总数
    pub emitted: usize,
}

pub struct WorkerPool {
    workers: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
}

/// 任务队列的投递端，投递结束（被消费或丢弃）时队列关闭
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

/// 运行中的池：逐条读取结果，最后等待完成信号
pub struct PoolHandle {
    results: mpsc::Receiver<JobResult>,
    done: oneshot::Receiver<PoolSummary>,
}

impl WorkerPool {
    /// 创建 worker 池及其任务队列，workers 为 0 时按 1 处理
    pub fn new(workers: usize) -> (Self, JobQueue) {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(workers);
        (
            Self {
                workers,
                jobs: Arc::new(Mutex::new(rx)),
            },
            JobQueue { tx },
        )
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// 启动恰好 W 个 worker
    pub fn run(self, shutdown: watch::Receiver<bool>) -> PoolHandle {
        let workers = self.workers;
        let (result_tx, result_rx) = mpsc::channel(workers);
        let (done_tx, done_rx) = oneshot::channel();

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    self.jobs.clone(),
                    result_tx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        // 只有 worker 持有结果发送端，全部退出后结果通道自然关闭
        drop(result_tx);

        tokio::spawn(async move {
            let mut emitted = 0;
            for joined in join_all(handles).await {
                match joined {
                    Ok(n) => emitted += n,
                    Err(e) => error!(error = %e, "worker 异常退出"),
                }
            }
            debug!(workers, emitted, "worker 池已结束");
            let _ = done_tx.send(PoolSummary { workers, emitted });
        });

        PoolHandle {
            results: result_rx,
            done: done_rx,
        }
    }
}

impl JobQueue {
    /// 按顺序投递一批任务，队列满时等待；收到关闭信号后停止投递
    ///
    /// 返回成功投递的任务数。
    pub async fn submit(self, jobs: Vec<Job>, mut shutdown: watch::Receiver<bool>) -> usize {
        let total = jobs.len();
        let mut submitted = 0;

        for job in jobs {
            tokio::select! {
                biased;

                _ = cancelled(&mut shutdown) => {
                    debug!(submitted, total, "收到取消信号，停止投递任务");
                    break;
                }
                sent = self.tx.send(job) => {
                    if sent.is_err() {
                        warn!(submitted, total, "任务队列已关闭，停止投递");
                        break;
                    }
                    submitted += 1;
                }
            }
        }

        debug!(submitted, total, "任务投递结束");
        submitted
    }
}

impl PoolHandle {
    /// 下一条结果；全部 worker 退出后返回 None
    pub async fn next_result(&mut self) -> Option<JobResult> {
        self.results.recv().await
    }

    /// 等待完成信号；汇总任务自身异常结束时返回 None
    pub async fn completed(self) -> Option<PoolSummary> {
        drop(self.results);
        self.done.await.ok()
    }

    /// 读完全部结果并等待完成
    pub async fn collect(mut self) -> (Vec<JobResult>, Option<PoolSummary>) {
        let mut results = Vec::new();
        while let Some(result) = self.next_result().await {
            results.push(result);
        }
        let summary = self.completed().await;
        (results, summary)
    }
}

async fn next_job(jobs: &Mutex<mpsc::Receiver<Job>>) -> Option<Job> {
    jobs.lock().await.recv().await
}

/// 单个 worker：一次取一个任务，每个任务发出一条结果
///
/// 队列关闭且取空后退出；空闲时收到取消信号则发出一条取消结果后退出；
/// 执行中被取消的任务以取消错误作为该任务的结果，随后退出。
async fn worker_loop(
    id: usize,
    jobs: Arc<Mutex<mpsc::Receiver<Job>>>,
    results: mpsc::Sender<JobResult>,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut emitted = 0;

    loop {
        let job = tokio::select! {
            biased;

            _ = cancelled(&mut shutdown) => {
                debug!(worker = id, "worker 收到取消信号");
                if results.send(JobResult::cancelled()).await.is_ok() {
                    emitted += 1;
                }
                break;
            }
            job = next_job(&jobs) => job,
        };

        let Some(job) = job else {
            break;
        };

        let descriptor = job.descriptor;
        let result = job.execute(&mut shutdown).await;
        let aborted = result.is_cancelled();

        if results.send(result).await.is_err() {
            warn!(worker = id, descriptor, "结果接收端已关闭，worker 退出");
            break;
        }
        emitted += 1;

        if aborted {
            debug!(worker = id, descriptor, "任务执行中被取消，worker 退出");
            break;
        }
    }

    emitted
}
