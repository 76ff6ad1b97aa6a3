//! 集成测试公共设施
//!
//! - StubAccrual：在临时端口上运行的外部积分服务桩（axum），按订单号返回预设响应
//! - MemoryRepo：内存版订单存储，语义与 PostgreSQL 实现一致（终态不回退、积分不清空）

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use accrual_service::models::{AccrualUpdate, Order, OrderNumber, OrderStatus};
use accrual_service::repository::OrderRepositoryTrait;
use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_TYPE, RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use loyalty_shared::error::{LedgerError, Result};
use parking_lot::Mutex;

// ==================== 订单号 ====================

pub fn number(raw: &str) -> OrderNumber {
    OrderNumber::parse(raw).unwrap()
}

/// 生成第 i 个合法订单号（补一位 Luhn 校验位）
pub fn nth_number(i: usize) -> OrderNumber {
    let base = 5000 + i;
    (0..10)
        .find_map(|d| OrderNumber::parse(&format!("{base}{d}")).ok())
        .expect("总能找到校验位")
}

// ==================== 积分服务桩 ====================

#[derive(Debug, Clone)]
pub enum Reply {
    /// 200 + 原样返回的响应体
    Body(String),
    /// 429 + Retry-After
    RateLimited(u64),
    /// 任意状态码、空响应体
    Status(u16),
    /// 等待后返回 204，用于超时测试
    Delay(Duration),
}

impl Reply {
    pub fn processed(number: OrderNumber, accrual: f64) -> Self {
        Self::Body(format!(
            r#"{{"order":"{number}","status":"PROCESSED","accrual":{accrual}}}"#
        ))
    }

    pub fn status(number: OrderNumber, status: &str) -> Self {
        Self::Body(format!(r#"{{"order":"{number}","status":"{status}"}}"#))
    }
}

#[derive(Default)]
struct StubState {
    replies: Mutex<HashMap<String, Reply>>,
    hits: Mutex<HashMap<String, usize>>,
}

pub struct StubAccrual {
    pub base_url: String,
    state: Arc<StubState>,
}

impl StubAccrual {
    /// 启动桩服务；未配置的订单返回 204
    pub async fn start() -> Self {
        let state = Arc::new(StubState::default());
        let app = Router::new()
            .route("/api/orders/{number}", get(order_status))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }

    pub fn reply(&self, number: OrderNumber, reply: Reply) {
        self.state.replies.lock().insert(number.to_string(), reply);
    }

    pub fn hits(&self, number: OrderNumber) -> usize {
        self.state
            .hits
            .lock()
            .get(&number.to_string())
            .copied()
            .unwrap_or_default()
    }

    pub fn total_hits(&self) -> usize {
        self.state.hits.lock().values().sum()
    }
}

async fn order_status(
    State(state): State<Arc<StubState>>,
    Path(number): Path<String>,
) -> Response {
    *state.hits.lock().entry(number.clone()).or_default() += 1;
    let reply = state.replies.lock().get(&number).cloned();

    match reply {
        Some(Reply::Body(body)) => {
            (StatusCode::OK, [(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Some(Reply::RateLimited(secs)) => (
            StatusCode::TOO_MANY_REQUESTS,
            [(RETRY_AFTER, secs.to_string())],
            "No more than N requests per minute allowed",
        )
            .into_response(),
        Some(Reply::Status(code)) => StatusCode::from_u16(code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        Some(Reply::Delay(wait)) => {
            tokio::time::sleep(wait).await;
            StatusCode::NO_CONTENT.into_response()
        }
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// ==================== 内存订单存储 ====================

#[derive(Default)]
pub struct MemoryRepo {
    orders: Mutex<HashMap<OrderNumber, Order>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MemoryRepo {
    pub fn with_orders(numbers: &[OrderNumber]) -> Arc<Self> {
        let repo = Arc::new(Self::default());
        {
            let mut orders = repo.orders.lock();
            for (i, n) in numbers.iter().enumerate() {
                let mut order = Order::new("user-1", *n);
                // 保证提交时间严格递增
                order.uploaded_at += chrono::Duration::milliseconds(i as i64);
                orders.insert(*n, order);
            }
        }
        repo
    }

    pub fn get(&self, number: OrderNumber) -> Option<Order> {
        self.orders.lock().get(&number).cloned()
    }

    pub fn status(&self, number: OrderNumber) -> OrderStatus {
        self.get(number).map(|o| o.status).unwrap_or_default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryRepo {
    async fn list_pending(&self) -> Result<Vec<Order>> {
        let mut pending: Vec<Order> = self
            .orders
            .lock()
            .values()
            .filter(|o| o.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|o| (o.uploaded_at, o.number));
        Ok(pending)
    }

    async fn update_accrual(&self, update: &AccrualUpdate) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut orders = self.orders.lock();
        let order = orders
            .get_mut(&update.number)
            .ok_or_else(|| LedgerError::order_not_found(update.number))?;
        order.apply(update);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut orders = self.orders.lock();
        if orders.contains_key(&order.number) {
            return Err(LedgerError::AlreadyExists {
                entity: "Order".to_string(),
                field: "number".to_string(),
                value: order.number.to_string(),
            });
        }
        orders.insert(order.number, order.clone());
        Ok(())
    }
}
