//! 待对账订单的内存缓存
//!
//! 启动时从存储恢复一次（restore），新订单提交时追加（add），
//! 只有终态成功落库后才移除（update）。落库失败时条目保留，下一轮继续对账。
//!
//! 写操作持有独占锁，list 持有共享锁；锁只保护内存 map，
//! 不会跨越存储写入的 await 点。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loyalty_shared::error::{LedgerError, Result};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use super::OrderSource;
use crate::models::{AccrualUpdate, Order, OrderNumber};
use crate::repository::OrderRepositoryTrait;

pub struct OrderCache {
    orders: RwLock<HashMap<OrderNumber, Order>>,
    repo: Arc<dyn OrderRepositoryTrait>,
}

impl OrderCache {
    pub fn new(repo: Arc<dyn OrderRepositoryTrait>) -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
            repo,
        }
    }

    /// 从存储加载全部待对账订单，返回缓存中的条目数
    pub async fn restore(&self) -> Result<usize> {
        let pending = self.repo.list_pending().await.inspect_err(|e| {
            error!(error = %e, "从存储恢复待对账订单失败");
        })?;

        if pending.is_empty() {
            debug!("没有待对账订单，缓存保持为空");
            return Ok(self.len());
        }

        let mut orders = self.orders.write();
        for order in pending.into_iter().filter(Order::is_pending) {
            orders.insert(order.number, order);
        }
        info!(count = orders.len(), "订单缓存恢复完成");
        Ok(orders.len())
    }

    /// 追加一个新提交的订单，终态订单不进入缓存
    pub fn add(&self, order: Order) {
        if !order.is_pending() {
            return;
        }
        let number = order.number;
        self.orders.write().insert(number, order);
        debug!(order = %number, "订单加入缓存");
    }

    /// 落库并更新缓存
    ///
    /// - 订单不在缓存中：返回 NotFound，不访问存储
    /// - 落库失败：条目保留，返回错误
    /// - 存储中已无此订单：移除条目，返回 NotFound
    /// - 终态落库成功：移除条目；非终态落库成功：刷新条目状态
    pub async fn update(&self, update: &AccrualUpdate) -> Result<()> {
        if !self.orders.write().contains_key(&update.number) {
            error!(order = %update.number, "订单不在缓存中");
            return Err(LedgerError::order_not_found(update.number));
        }

        if let Err(e) = self.repo.update_accrual(update).await {
            if e.is_not_found() {
                // 存储中已删除的订单不再保留在缓存中
                self.orders.write().remove(&update.number);
                warn!(order = %update.number, "存储中已无此订单，移出缓存");
                return Err(e);
            }
            error!(
                order = %update.number,
                status = %update.status,
                error = %e,
                "积分结果落库失败，保留缓存条目等待重试"
            );
            return Err(e);
        }

        let mut orders = self.orders.write();
        if update.is_terminal() {
            if orders.remove(&update.number).is_some() {
                debug!(order = %update.number, status = %update.status, "订单已完成对账，移出缓存");
            }
        } else if let Some(order) = orders.get_mut(&update.number) {
            order.apply(update);
        }
        Ok(())
    }

    /// 当前缓存的待对账订单快照，按提交时间升序
    pub fn list(&self) -> Vec<Order> {
        let mut snapshot: Vec<Order> = self.orders.read().values().cloned().collect();
        snapshot.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.number.cmp(&b.number))
        });
        snapshot
    }

    pub fn contains(&self, number: OrderNumber) -> bool {
        self.orders.read().contains_key(&number)
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OrderSource for OrderCache {
    async fn list_pending(&self) -> Result<Vec<Order>> {
        Ok(self.list())
    }

    async fn persist(&self, update: &AccrualUpdate) -> Result<()> {
        self.update(update).await
    }

    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order> {
        let order = Order::new(user_id, number);
        self.repo.insert_order(&order).await?;
        self.add(order.clone());
        Ok(order)
    }
}
