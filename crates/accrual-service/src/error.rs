//! 积分对账服务专用错误类型
//!
//! 在共享库 LedgerError 基础上定义外部积分服务交互特有的错误变体。
//! 除 `InvalidOrderNumber` 外都属于"本轮放弃、下一轮再查"的瞬时错误。

use loyalty_shared::error::LedgerError;

use crate::models::OrderNumber;

/// 积分对账错误
#[derive(Debug, thiserror::Error)]
pub enum AccrualError {
    /// 积分服务尚未登记该订单（204）
    #[error("积分服务暂无订单记录: order={order}")]
    NoContent { order: OrderNumber },

    /// 超出积分服务允许的请求频率（429），retry_after 取自 Retry-After 头（秒）
    #[error("积分服务限流: order={order}, retry_after={retry_after:?}")]
    RateLimited {
        order: OrderNumber,
        retry_after: Option<u64>,
    },

    /// 其他非预期的 HTTP 状态码
    #[error("积分服务返回异常状态: order={order}, status={status}")]
    UnexpectedStatus { order: OrderNumber, status: u16 },

    /// 网络错误、超时或请求构造失败
    #[error("积分服务请求失败: order={order}, {message}")]
    Transport { order: OrderNumber, message: String },

    /// 响应体无法解析，或与请求的订单不一致
    #[error("积分服务响应解析失败: order={order}, {message}")]
    Decode { order: OrderNumber, message: String },

    #[error("无效的订单号: {0}")]
    InvalidOrderNumber(String),

    /// 关闭信号到达，任务被放弃
    #[error("任务已取消")]
    Cancelled,

    /// 透传共享库错误（存储读写失败、订单不在缓存中等）
    #[error(transparent)]
    Shared(#[from] LedgerError),
}

impl AccrualError {
    /// 指标标签使用的简短分类
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::NoContent { .. } => "no_content",
            Self::RateLimited { .. } => "rate_limited",
            Self::UnexpectedStatus { .. } => "unexpected_status",
            Self::Transport { .. } => "transport_error",
            Self::Decode { .. } => "decode_error",
            Self::InvalidOrderNumber(_) => "invalid_order_number",
            Self::Cancelled => "cancelled",
            Self::Shared(_) => "persist_error",
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Shared(e) if e.is_not_found())
    }
}
