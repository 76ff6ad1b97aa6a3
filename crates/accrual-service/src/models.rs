//! 订单与积分计算结果的数据模型
//!
//! 订单号在边界处解析：对外（JSON、URL）始终是十进制字符串，
//! 对内和存储层使用 i64，解析时做 Luhn 校验。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AccrualError;

// ---------------------------------------------------------------------------
// OrderNumber
// ---------------------------------------------------------------------------

/// 订单号
///
/// 只能通过 [`OrderNumber::parse`] 从外部输入构造，保证是通过 Luhn 校验的正整数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, sqlx::Type)]
#[sqlx(transparent)]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// 解析十进制字符串形式的订单号
    pub fn parse(raw: &str) -> Result<Self, AccrualError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccrualError::InvalidOrderNumber(raw.to_string()));
        }
        if !luhn_valid(raw) {
            return Err(AccrualError::InvalidOrderNumber(raw.to_string()));
        }
        raw.parse::<i64>()
            .map(Self)
            .map_err(|_| AccrualError::InvalidOrderNumber(raw.to_string()))
    }

    pub fn value(self) -> i64 {
        self.0
    }
}

/// Luhn 校验：从右往左，偶数位乘 2，大于 9 减 9，总和能被 10 整除
fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

impl FromStr for OrderNumber {
    type Err = AccrualError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for OrderNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// 本地订单状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// 已提交，尚未得到积分服务的结论
    #[default]
    New,
    /// 积分服务已受理，计算中
    Processing,
    /// 计算完成，积分已确定
    Processed,
    /// 积分服务拒绝计算
    Invalid,
}

impl OrderStatus {
    /// 终态订单不再参与对账
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Processed | Self::Invalid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Processing => "PROCESSING",
            Self::Processed => "PROCESSED",
            Self::Invalid => "INVALID",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 订单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub number: OrderNumber,
    pub user_id: String,
    pub status: OrderStatus,
    /// 仅在 PROCESSED 时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
    pub uploaded_at: DateTime<Utc>,
}

impl Order {
    /// 新提交的订单
    pub fn new(user_id: impl Into<String>, number: OrderNumber) -> Self {
        Self {
            number,
            user_id: user_id.into(),
            status: OrderStatus::New,
            accrual: None,
            uploaded_at: Utc::now(),
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// 在本地副本上应用一次积分更新，遵循与存储层相同的单调规则
    pub fn apply(&mut self, update: &AccrualUpdate) {
        if self.status.is_terminal() {
            return;
        }
        self.status = update.status;
        if update.accrual.is_some() {
            self.accrual = update.accrual;
        }
    }
}

// ---------------------------------------------------------------------------
// 外部积分服务响应
// ---------------------------------------------------------------------------

/// 积分服务侧的订单状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Invalid,
    Processed,
}

impl AccrualStatus {
    /// 映射为本地订单状态
    pub fn to_order_status(self) -> OrderStatus {
        match self {
            Self::Registered | Self::Processing => OrderStatus::Processing,
            Self::Invalid => OrderStatus::Invalid,
            Self::Processed => OrderStatus::Processed,
        }
    }
}

/// `GET /api/orders/{number}` 的响应体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<f64>,
}

/// 写回存储的一次状态与积分变更
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccrualUpdate {
    pub number: OrderNumber,
    pub status: OrderStatus,
    pub accrual: Option<f64>,
}

impl AccrualUpdate {
    /// 根据积分服务响应构造更新
    ///
    /// 只有 PROCESSED 携带积分；PROCESSED 但未给出积分时记为 0。
    pub fn from_response(number: OrderNumber, response: &AccrualResponse) -> Self {
        let status = response.status.to_order_status();
        let accrual = match status {
            OrderStatus::Processed => Some(response.accrual.unwrap_or(0.0)),
            _ => None,
        };
        Self {
            number,
            status,
            accrual,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
