//! 积分对账服务入口
//!
//! 启动后按配置的间隔持续对账，收到 Ctrl+C / SIGTERM 时取消进行中的对账并退出。

use std::sync::Arc;

use accrual_service::gateway::{AccrualClient, ReconcileHandler};
use accrual_service::repository::{OrderRepository, OrderRepositoryTrait};
use accrual_service::scheduler::AccrualScheduler;
use accrual_service::source::{OrderCache, OrderSource, StoreOrderSource};
use anyhow::Context;
use loyalty_shared::{config::AppConfig, database::Database, observability, retry::RetryPolicy};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load("accrual-service").context("加载配置失败")?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!(
        service = %config.service_name,
        environment = %config.environment,
        accrual_url = %config.accrual.base_url,
        "Starting accrual reconciler"
    );
    if config.is_production() && !config.observability.json_logs() {
        warn!("生产环境建议使用 json 日志格式");
    }

    // 存储不可达时直接退出
    let db = Database::connect(&config.database)
        .await
        .context("连接数据库失败")?;
    db.health_check().await.context("数据库健康检查失败")?;
    let repo: Arc<dyn OrderRepositoryTrait> = Arc::new(OrderRepository::new(db.pool().clone()));

    let source: Arc<dyn OrderSource> = if config.accrual.use_memory_cache {
        let cache = OrderCache::new(repo.clone());
        let restored = cache.restore().await.context("恢复订单缓存失败")?;
        info!(restored, "订单缓存已启用");
        Arc::new(cache)
    } else {
        info!("订单缓存未启用，每轮直接读取存储");
        Arc::new(StoreOrderSource::new(repo))
    };

    let gateway = Arc::new(AccrualClient::new(
        &config.accrual.base_url,
        config.accrual.request_timeout(),
        RetryPolicy::with_max_retries(config.accrual.rate_limit_retries),
    )?);
    let handler = Arc::new(ReconcileHandler::new(gateway, source.clone()));

    let scheduler = AccrualScheduler::new(
        source,
        handler,
        config.accrual.sync_interval(),
        config.accrual.workers(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler_task.await {
        error!(error = %e, "调度器任务异常退出");
    }

    db.close().await;
    info!("Accrual reconciler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
