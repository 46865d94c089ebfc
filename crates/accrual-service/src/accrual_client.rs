//! 外部积分计算系统客户端
//!
//! 每次查询是一次幂等的 `GET {base}/api/orders/{number}`。
//! 客户端本身无状态，只负责把 HTTP 层面的各种结果归类为
//! [`AccrualStatus`] 或 [`AccrualClientError`]，重试与节流由 Worker 池决定。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use gophermart_shared::config::AccrualConfig;
use gophermart_shared::observability::metrics as obs_metrics;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::{AccrualError, Result};
use crate::models::Amount;

/// 外部系统给出的订单状态（封闭集合）
#[derive(Debug, Clone, PartialEq)]
pub enum AccrualStatus {
    /// 已登记，尚未开始计算
    Registered,
    /// 计算中
    Processing,
    /// 拒绝计算，终态
    Invalid,
    /// 计算完成，终态
    Processed { accrual: Amount },
}

impl AccrualStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registered => "REGISTERED",
            Self::Processing => "PROCESSING",
            Self::Invalid => "INVALID",
            Self::Processed { .. } => "PROCESSED",
        }
    }
}

/// 一次成功查询的结果
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
}

/// 外部系统调用错误
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccrualClientError {
    #[error("积分服务限流，{retry_after:?} 后重试")]
    RateLimited { retry_after: Duration },

    #[error("积分服务请求超时")]
    Timeout,

    #[error("积分服务网络错误: {0}")]
    Transport(String),

    #[error("积分服务内部错误: HTTP {0}")]
    ServerError(u16),

    #[error("积分服务返回非预期状态码: HTTP {0}")]
    UnexpectedStatus(u16),

    #[error("积分服务响应格式错误: {0}")]
    Malformed(String),

    #[error("订单未在积分服务登记")]
    UnknownOrder,
}

impl AccrualClientError {
    /// 是否按普通退避重试
    ///
    /// 限流有单独的暂停逻辑，未登记订单由策略决定，二者都不算普通重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Transport(_)
                | Self::ServerError(_)
                | Self::UnexpectedStatus(_)
                | Self::Malformed(_)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// 指标与日志使用的分类标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout => "timeout",
            Self::Transport(_) => "transport",
            Self::ServerError(_) => "server_error",
            Self::UnexpectedStatus(_) => "unexpected_status",
            Self::Malformed(_) => "malformed",
            Self::UnknownOrder => "unknown_order",
        }
    }
}

/// 积分系统客户端接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccrualClient: Send + Sync {
    async fn query(&self, order_number: &str) -> std::result::Result<AccrualReply, AccrualClientError>;
}

/// 外部系统返回的 JSON
#[derive(Debug, Deserialize)]
struct WireReply {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<f64>,
}

impl TryFrom<WireReply> for AccrualReply {
    type Error = AccrualClientError;

    fn try_from(wire: WireReply) -> std::result::Result<Self, Self::Error> {
        let status = match wire.status.as_str() {
            "REGISTERED" => AccrualStatus::Registered,
            "PROCESSING" => AccrualStatus::Processing,
            "INVALID" => AccrualStatus::Invalid,
            "PROCESSED" => {
                let points = wire.accrual.ok_or_else(|| {
                    AccrualClientError::Malformed("PROCESSED 响应缺少 accrual".to_string())
                })?;
                let accrual = Amount::from_points(points)
                    .filter(|a| !a.is_negative())
                    .ok_or_else(|| {
                        AccrualClientError::Malformed(format!("accrual 取值非法: {points}"))
                    })?;
                AccrualStatus::Processed { accrual }
            }
            other => {
                return Err(AccrualClientError::Malformed(format!("未知订单状态: {other}")));
            }
        };

        Ok(Self {
            order: wire.order,
            status,
        })
    }
}

/// 规范化外部服务地址
///
/// 接受 `host:port`、`:port` 或完整 URL，缺少协议时补 `http://`
pub fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(AccrualError::InvalidConfig("accrual.base_url 为空".to_string()));
    }

    let with_host = if trimmed.starts_with(':') {
        format!("localhost{trimmed}")
    } else {
        trimmed.to_string()
    };

    if with_host.contains("://") {
        Ok(with_host)
    } else {
        Ok(format!("http://{with_host}"))
    }
}

/// 基于 reqwest 的客户端实现
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
    default_retry_after: Duration,
}

impl HttpAccrualClient {
    pub fn new(config: &AccrualConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AccrualError::InvalidConfig(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            base_url: normalize_base_url(&config.base_url)?,
            default_retry_after: config.default_retry_after(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 解析 Retry-After（秒），缺失或不可解析时使用默认值
    fn parse_retry_after(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        headers
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }

    async fn send(&self, order_number: &str) -> std::result::Result<AccrualReply, AccrualClientError> {
        let url = format!("{}/api/orders/{}", self.base_url, order_number);

        let resp = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                AccrualClientError::Timeout
            } else {
                AccrualClientError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        match status {
            StatusCode::OK => {
                let body = resp.bytes().await.map_err(|e| {
                    if e.is_timeout() {
                        AccrualClientError::Timeout
                    } else {
                        AccrualClientError::Transport(e.to_string())
                    }
                })?;
                let wire: WireReply = serde_json::from_slice(&body)
                    .map_err(|e| AccrualClientError::Malformed(e.to_string()))?;
                let reply = AccrualReply::try_from(wire)?;
                if reply.order != order_number {
                    return Err(AccrualClientError::Malformed(format!(
                        "响应订单号不匹配: 期望 {order_number}，实际 {}",
                        reply.order
                    )));
                }
                Ok(reply)
            }
            StatusCode::NO_CONTENT => Err(AccrualClientError::UnknownOrder),
            StatusCode::TOO_MANY_REQUESTS => Err(AccrualClientError::RateLimited {
                retry_after: self.parse_retry_after(resp.headers()),
            }),
            s if s.is_server_error() => Err(AccrualClientError::ServerError(s.as_u16())),
            s => Err(AccrualClientError::UnexpectedStatus(s.as_u16())),
        }
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn query(&self, order_number: &str) -> std::result::Result<AccrualReply, AccrualClientError> {
        let started = Instant::now();
        let result = self.send(order_number).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(reply) => {
                debug!(order = %order_number, status = reply.status.as_str(), "积分服务查询成功");
                obs_metrics::record_accrual_request("ok", elapsed);
            }
            Err(err) => {
                if !matches!(err, AccrualClientError::UnknownOrder) {
                    warn!(order = %order_number, error = %err, "积分服务查询失败");
                }
                obs_metrics::record_accrual_request(err.kind(), elapsed);
            }
        }

        result
    }
}
