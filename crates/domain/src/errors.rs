//! 领域模型错误定义
//!
//! 枢纽内部的失败都在本地记录日志后丢弃，这里的错误类型只用于
//! 描述“为什么被丢弃”，便于日志和测试断言。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验错误
    #[error("参数无效: {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 客户端帧无法解码
    #[error("无法解析客户端帧: {message}")]
    MalformedFrame { message: String },

    /// 下行负载无法编码
    #[error("无法编码下行帧: {message}")]
    EncodeFailed { message: String },
}

impl DomainError {
    /// 创建参数无效错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// 创建客户端帧解析错误
    pub fn malformed_frame(message: impl Into<String>) -> Self {
        Self::MalformedFrame {
            message: message.into(),
        }
    }

    /// 创建下行帧编码错误
    pub fn encode_failed(message: impl Into<String>) -> Self {
        Self::EncodeFailed {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
