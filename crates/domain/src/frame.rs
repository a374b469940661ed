use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::{DomainError, DomainResult};

/// 下行帧
///
/// 一次广播会被复制到很多连接的队列里，内部用 `Arc<str>` 共享同一份编码结果。
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundFrame(Arc<str>);

impl OutboundFrame {
    /// 把任意可序列化的负载编码为 JSON 帧
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> DomainResult<Self> {
        let text = serde_json::to_string(payload)
            .map_err(|err| DomainError::encode_failed(err.to_string()))?;
        Ok(Self(Arc::from(text)))
    }

    /// 使用已经编码好的文本
    pub fn text(text: impl Into<String>) -> Self {
        Self(Arc::from(text.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OutboundFrame").field(&self.len()).finish()
    }
}
