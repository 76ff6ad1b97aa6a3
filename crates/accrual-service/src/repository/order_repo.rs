//! 订单仓储的 PostgreSQL 实现

use async_trait::async_trait;
use loyalty_shared::error::{LedgerError, Result};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::traits::OrderRepositoryTrait;
use crate::models::{AccrualUpdate, Order, OrderStatus};

pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    #[instrument(skip(self))]
    async fn list_pending(&self) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status IN ('NEW', 'PROCESSING')
            ORDER BY uploaded_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = orders.len(), "查询待对账订单");
        Ok(orders)
    }

    /// 行锁保证同一订单的并发写入串行化，终态行不再修改
    #[instrument(skip(self), fields(order = %update.number))]
    async fn update_accrual(&self, update: &AccrualUpdate) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query_scalar::<_, OrderStatus>(
            "SELECT status FROM orders WHERE number = $1 FOR UPDATE",
        )
        .bind(update.number)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Err(LedgerError::order_not_found(update.number));
        };

        if current.is_terminal() {
            debug!(status = %current, "订单已是终态，跳过更新");
            tx.rollback().await?;
            return Ok(());
        }

        // 积分一旦写入不会被清空
        sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, accrual = COALESCE($3, accrual)
            WHERE number = $1
            "#,
        )
        .bind(update.number)
        .bind(update.status)
        .bind(update.accrual)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, order), fields(order = %order.number, user_id = %order.user_id))]
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, accrual, uploaded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(order.number)
        .bind(&order.user_id)
        .bind(order.status)
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::AlreadyExists {
                entity: "Order".to_string(),
                field: "number".to_string(),
                value: order.number.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OrderNumber;

    /// 连接 DATABASE_URL 指向的数据库并执行 migrations/ 下的建表脚本
    async fn setup() -> OrderRepository {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("数据库连接失败");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("执行迁移失败");
        sqlx::query("DELETE FROM orders WHERE user_id = 'repo-test'")
            .execute(&pool)
            .await
            .expect("清理测试数据失败");
        OrderRepository::new(pool)
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_insert_list_and_update() {
        let repo = setup().await;
        let number = OrderNumber::parse("9278923470").unwrap();

        repo.insert_order(&Order::new("repo-test", number)).await.unwrap();
        let dup = repo.insert_order(&Order::new("repo-test", number)).await;
        assert!(matches!(dup, Err(LedgerError::AlreadyExists { .. })));

        let pending = repo.list_pending().await.unwrap();
        assert!(pending.iter().any(|o| o.number == number));

        repo.update_accrual(&AccrualUpdate {
            number,
            status: OrderStatus::Processed,
            accrual: Some(729.98),
        })
        .await
        .unwrap();

        // 终态之后的降级写入被忽略
        repo.update_accrual(&AccrualUpdate {
            number,
            status: OrderStatus::Processing,
            accrual: None,
        })
        .await
        .unwrap();

        let pending = repo.list_pending().await.unwrap();
        assert!(pending.iter().all(|o| o.number != number));
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_update_unknown_order() {
        let repo = setup().await;
        let number = OrderNumber::parse("346436439").unwrap();
        let result = repo
            .update_accrual(&AccrualUpdate {
                number,
                status: OrderStatus::Invalid,
                accrual: None,
            })
            .await;
        assert!(matches!(result, Err(e) if e.is_not_found()));
    }
}
