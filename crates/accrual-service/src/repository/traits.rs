//! 仓储 Trait 定义
//!
//! 对账流程只依赖这里的抽象，持久化实现可替换，测试中使用 mock

use async_trait::async_trait;
use loyalty_shared::error::Result;

use crate::models::{AccrualUpdate, Order};

/// 订单仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    /// 所有未到终态的订单，按提交时间升序
    async fn list_pending(&self) -> Result<Vec<Order>>;

    /// 写入积分结果；订单已是终态时不做任何修改，订单不存在返回 NotFound
    async fn update_accrual(&self, update: &AccrualUpdate) -> Result<()>;

    /// 登记新订单，订单号已存在返回 AlreadyExists
    async fn insert_order(&self, order: &Order) -> Result<()>;
}
