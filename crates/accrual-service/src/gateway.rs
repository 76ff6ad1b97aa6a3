//! 外部积分计算服务客户端
//!
//! 通过 AccrualGateway trait 抽象 HTTP 调用，便于测试时注入 mock 实现。
//! ReconcileHandler 把一次查询和一次写回组合成 worker 执行的单个任务。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loyalty_shared::error::LedgerError;
use loyalty_shared::observability::metrics;
use loyalty_shared::retry::{RetryPolicy, retry_with_policy};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use tracing::{debug, info, warn};

use crate::error::AccrualError;
use crate::models::{AccrualResponse, AccrualUpdate, Order, OrderNumber};
use crate::source::OrderSource;
use crate::worker::JobHandler;

// ---------------------------------------------------------------------------
// Trait 抽象
// ---------------------------------------------------------------------------

/// 积分计算服务的查询接口
#[async_trait]
pub trait AccrualGateway: Send + Sync {
    /// 查询单个订单的积分计算状态
    async fn fetch_accrual(&self, number: OrderNumber) -> Result<AccrualResponse, AccrualError>;
}

// ---------------------------------------------------------------------------
// HTTP 客户端实现
// ---------------------------------------------------------------------------

/// 基于 reqwest 的积分服务客户端
///
/// reqwest::Client 内部带连接池，多个 worker 共享同一个实例。
pub struct AccrualClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl AccrualClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::ExternalService {
                service: "accrual".to_string(),
                message: format!("HTTP 客户端初始化失败: {e}"),
            })?;

        let base_url = base_url.trim_end_matches('/').to_string();
        info!(
            base_url = %base_url,
            timeout_ms = timeout.as_millis() as u64,
            max_retries = retry.max_retries,
            "积分服务客户端已初始化"
        );

        Ok(Self {
            http,
            base_url,
            retry,
        })
    }

    fn order_url(&self, number: OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url, number)
    }

    async fn fetch_once(&self, number: OrderNumber) -> Result<AccrualResponse, AccrualError> {
        let transport = |e: reqwest::Error| AccrualError::Transport {
            order: number,
            message: e.to_string(),
        };

        let response = self
            .http
            .get(self.order_url(number))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            StatusCode::OK => {
                let body = response.bytes().await.map_err(transport)?;
                decode_body(number, &body)
            }
            StatusCode::NO_CONTENT => Err(AccrualError::NoContent { order: number }),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());
                Err(AccrualError::RateLimited {
                    order: number,
                    retry_after,
                })
            }
            other => Err(AccrualError::UnexpectedStatus {
                order: number,
                status: other.as_u16(),
            }),
        }
    }
}

/// 解析 200 响应体，订单号必须与请求一致
fn decode_body(number: OrderNumber, body: &[u8]) -> Result<AccrualResponse, AccrualError> {
    let decoded: AccrualResponse =
        serde_json::from_slice(body).map_err(|e| AccrualError::Decode {
            order: number,
            message: e.to_string(),
        })?;

    match OrderNumber::parse(&decoded.order) {
        Ok(echoed) if echoed == number => Ok(decoded),
        _ => Err(AccrualError::Decode {
            order: number,
            message: format!("响应中的订单号不一致: {}", decoded.order),
        }),
    }
}

#[async_trait]
impl AccrualGateway for AccrualClient {
    async fn fetch_accrual(&self, number: OrderNumber) -> Result<AccrualResponse, AccrualError> {
        let result = retry_with_policy(
            &self.retry,
            "fetch_accrual",
            AccrualError::is_rate_limited,
            || self.fetch_once(number),
        )
        .await;

        match &result {
            Ok(resp) => {
                debug!(order = %number, status = ?resp.status, accrual = ?resp.accrual, "积分服务查询成功");
                metrics::record_accrual_request("ok");
            }
            Err(e) => {
                warn!(order = %number, error = %e, "积分服务查询失败");
                metrics::record_accrual_request(e.outcome());
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// 单订单对账任务
// ---------------------------------------------------------------------------

/// 查询积分服务并把结果写回订单来源
pub struct ReconcileHandler {
    gateway: Arc<dyn AccrualGateway>,
    source: Arc<dyn OrderSource>,
}

impl ReconcileHandler {
    pub fn new(gateway: Arc<dyn AccrualGateway>, source: Arc<dyn OrderSource>) -> Self {
        Self { gateway, source }
    }
}

#[async_trait]
impl JobHandler for ReconcileHandler {
    async fn handle(&self, order: &Order) -> Result<(), AccrualError> {
        let response = self.gateway.fetch_accrual(order.number).await?;
        let update = AccrualUpdate::from_response(order.number, &response);

        self.source.persist(&update).await?;
        debug!(
            order = %order.number,
            from = %order.status,
            to = %update.status,
            accrual = ?update.accrual,
            "订单对账结果已写回"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AccrualStatus, OrderStatus};
    use loyalty_shared::error::Result as LedgerResult;
    use parking_lot::Mutex;

    fn number(raw: &str) -> OrderNumber {
        OrderNumber::parse(raw).unwrap()
    }

    struct StubGateway(Result<AccrualResponse, u16>);

    #[async_trait]
    impl AccrualGateway for StubGateway {
        async fn fetch_accrual(&self, number: OrderNumber) -> Result<AccrualResponse, AccrualError> {
            match &self.0 {
                Ok(resp) => Ok(resp.clone()),
                Err(204) => Err(AccrualError::NoContent { order: number }),
                Err(status) => Err(AccrualError::UnexpectedStatus {
                    order: number,
                    status: *status,
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSource {
        persisted: Mutex<Vec<AccrualUpdate>>,
        fail: bool,
    }

    #[async_trait]
    impl OrderSource for RecordingSource {
        async fn list_pending(&self) -> LedgerResult<Vec<Order>> {
            Ok(vec![])
        }

        async fn persist(&self, update: &AccrualUpdate) -> LedgerResult<()> {
            if self.fail {
                return Err(LedgerError::order_not_found(update.number));
            }
            self.persisted.lock().push(*update);
            Ok(())
        }

        async fn submit_order(&self, user_id: &str, number: OrderNumber) -> LedgerResult<Order> {
            Ok(Order::new(user_id, number))
        }
    }

    #[test]
    fn test_decode_body() {
        let n = number("12345678903");

        let resp = decode_body(n, br#"{"order":"12345678903","status":"PROCESSED","accrual":729.98}"#)
            .unwrap();
        assert_eq!(resp.status, AccrualStatus::Processed);
        assert_eq!(resp.accrual, Some(729.98));

        assert!(matches!(
            decode_body(n, b"{not json"),
            Err(AccrualError::Decode { .. })
        ));
        assert!(matches!(
            decode_body(n, br#"{"order":"79927398713","status":"INVALID"}"#),
            Err(AccrualError::Decode { .. })
        ));
    }

    #[test]
    fn test_order_url_trims_trailing_slash() {
        let client =
            AccrualClient::new("http://accrual:8080/", Duration::from_secs(1), RetryPolicy::none())
                .unwrap();
        assert_eq!(
            client.order_url(number("12345678903")),
            "http://accrual:8080/api/orders/12345678903"
        );
    }

    #[tokio::test]
    async fn test_handler_persists_mapped_update() {
        let n = number("12345678903");
        let gateway = Arc::new(StubGateway(Ok(AccrualResponse {
            order: n.to_string(),
            status: AccrualStatus::Registered,
            accrual: None,
        })));
        let source = Arc::new(RecordingSource::default());
        let handler = ReconcileHandler::new(gateway, source.clone());

        handler.handle(&Order::new("user-1", n)).await.unwrap();

        let persisted = source.persisted.lock();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].status, OrderStatus::Processing);
        assert_eq!(persisted[0].accrual, None);
    }

    #[tokio::test]
    async fn test_handler_skips_persist_on_gateway_error() {
        let n = number("12345678903");
        let source = Arc::new(RecordingSource::default());
        let handler = ReconcileHandler::new(Arc::new(StubGateway(Err(204))), source.clone());

        let err = handler.handle(&Order::new("user-1", n)).await.unwrap_err();
        assert!(matches!(err, AccrualError::NoContent { .. }));
        assert!(source.persisted.lock().is_empty());

        let handler = ReconcileHandler::new(Arc::new(StubGateway(Err(500))), source.clone());
        let err = handler.handle(&Order::new("user-1", n)).await.unwrap_err();
        assert!(matches!(err, AccrualError::UnexpectedStatus { status: 500, .. }));
        assert!(source.persisted.lock().is_empty());
    }

    #[tokio::test]
    async fn test_handler_reports_persist_failure() {
        let n = number("12345678903");
        let gateway = Arc::new(StubGateway(Ok(AccrualResponse {
            order: n.to_string(),
            status: AccrualStatus::Processed,
            accrual: Some(500.0),
        })));
        let source = Arc::new(RecordingSource {
            fail: true,
            ..Default::default()
        });
        let handler = ReconcileHandler::new(gateway, source);

        let err = handler.handle(&Order::new("user-1", n)).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
