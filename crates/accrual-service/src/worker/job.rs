//! 任务与结果模型

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use super::cancelled;
use crate::error::AccrualError;
use crate::models::Order;

/// 单个订单的处理逻辑：查询外部服务并写回结果
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, order: &Order) -> Result<(), AccrualError>;
}

/// 一轮对账内的一个任务
///
/// descriptor 是本轮内的序号，只用于把结果对应回任务。
pub struct Job {
    pub descriptor: usize,
    pub order: Order,
    handler: Arc<dyn JobHandler>,
}

impl Job {
    pub fn new(descriptor: usize, order: Order, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            descriptor,
            order,
            handler,
        }
    }

    /// 执行任务；关闭信号先到时放弃进行中的调用并返回取消结果
    pub(crate) async fn execute(self, shutdown: &mut watch::Receiver<bool>) -> JobResult {
        let outcome = tokio::select! {
            biased;

            _ = cancelled(shutdown) => Err(AccrualError::Cancelled),
            res = self.handler.handle(&self.order) => res,
        };

        JobResult {
            descriptor: Some(self.descriptor),
            error: outcome.err(),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("descriptor", &self.descriptor)
            .field("order", &self.order.number)
            .finish()
    }
}

/// 任务执行结果，仅用于对账循环的日志与计数
///
/// 空闲 worker 收到取消信号时发出的结果没有 descriptor。
#[derive(Debug)]
pub struct JobResult {
    pub descriptor: Option<usize>,
    pub error: Option<AccrualError>,
}

impl JobResult {
    pub(crate) fn cancelled() -> Self {
        Self {
            descriptor: None,
            error: Some(AccrualError::Cancelled),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.as_ref().is_some_and(AccrualError::is_cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderNumber;

    struct Fixed(Option<u16>);

    #[async_trait]
    impl JobHandler for Fixed {
        async fn handle(&self, order: &Order) -> Result<(), AccrualError> {
            match self.0 {
                None => Ok(()),
                Some(status) => Err(AccrualError::UnexpectedStatus {
                    order: order.number,
                    status,
                }),
            }
        }
    }

    struct Hang;

    #[async_trait]
    impl JobHandler for Hang {
        async fn handle(&self, _order: &Order) -> Result<(), AccrualError> {
            std::future::pending().await
        }
    }

    fn order() -> Order {
        Order::new("user-1", OrderNumber::parse("12345678903").unwrap())
    }

    #[tokio::test]
    async fn test_execute_success_and_failure() {
        let (_tx, mut rx) = watch::channel(false);

        let ok = Job::new(3, order(), Arc::new(Fixed(None))).execute(&mut rx).await;
        assert_eq!(ok.descriptor, Some(3));
        assert!(ok.is_ok());

        let failed = Job::new(4, order(), Arc::new(Fixed(Some(500))))
            .execute(&mut rx)
            .await;
        assert_eq!(failed.descriptor, Some(4));
        assert!(matches!(
            failed.error,
            Some(AccrualError::UnexpectedStatus { status: 500, .. })
        ));
        assert!(!failed.is_cancelled());
    }

    #[tokio::test]
    async fn test_execute_aborts_on_cancel() {
        let (tx, mut rx) = watch::channel(false);
        let job = Job::new(7, order(), Arc::new(Hang));

        let handle = tokio::spawn(async move { job.execute(&mut rx).await });
        tokio::task::yield_now().await;
        tx.send(true).unwrap();

        let result = handle.await.unwrap();
        assert_eq!(result.descriptor, Some(7));
        assert!(result.is_cancelled());
    }
}
