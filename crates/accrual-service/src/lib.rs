//! 积分对账服务
//!
//! 周期性地把本地尚未结算的订单与外部积分计算服务对账：
//!
//! - `scheduler`：按间隔触发一轮对账，任何时刻最多一轮在执行
//! - `worker`：有界并发的 worker 池，每个订单一个任务、一个结果
//! - `gateway`：外部积分服务 HTTP 客户端，以及单订单的对账任务
//! - `source`：待对账订单来源（直接访问存储或带内存缓存）
//! - `repository`：订单持久化（PostgreSQL）

pub mod error;
pub mod gateway;
pub mod models;
pub mod repository;
pub mod scheduler;
pub mod source;
pub mod worker;

pub use error::AccrualError;
pub use scheduler::{AccrualScheduler, SweepReport};
