//! 订单来源
//!
//! 对账流程通过 [`OrderSource`] 读取待对账订单并写回结果。
//! 两种实现：直接访问存储的 [`StoreOrderSource`]，以及带内存缓存的 [`OrderCache`]。

mod cache;

use std::sync::Arc;

use async_trait::async_trait;
use loyalty_shared::error::Result;

use crate::models::{AccrualUpdate, Order, OrderNumber};
use crate::repository::OrderRepositoryTrait;

pub use cache::OrderCache;

/// 对账使用的订单来源
///
/// persist 会被多个 worker 针对不同订单并发调用，实现必须是并发安全的。
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// 待对账订单快照；跨轮次重复返回同一订单是正常的
    async fn list_pending(&self) -> Result<Vec<Order>>;

    /// 写回一次状态/积分变更
    async fn persist(&self, update: &AccrualUpdate) -> Result<()>;

    /// 登记用户新提交的订单
    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order>;
}

/// 每次都访问存储的订单来源
pub struct StoreOrderSource {
    repo: Arc<dyn OrderRepositoryTrait>,
}

impl StoreOrderSource {
    pub fn new(repo: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl OrderSource for StoreOrderSource {
    async fn list_pending(&self) -> Result<Vec<Order>> {
        self.repo.list_pending().await
    }

    async fn persist(&self, update: &AccrualUpdate) -> Result<()> {
        self.repo.update_accrual(update).await
    }

    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order> {
        let order = Order::new(user_id, number);
        self.repo.insert_order(&order).await?;
        Ok(order)
    }
}
