use std::time::{Duration, Instant};

use config::HubConfig;

/// 单连接消息限流器
///
/// 固定时间窗口计数：每条上行消息到达时惰性检查窗口是否过期，
/// 不依赖后台定时器。状态只属于所在的连接，不存在跨连接竞争。
#[derive(Debug, Clone)]
pub struct RateGate {
    /// 每个窗口最大消息数
    max_messages: u32,
    /// 窗口长度
    window_duration: Duration,
    /// 当前时间窗口内的消息数量
    message_count: u32,
    /// 当前时间窗口的开始时间
    window_start: Instant,
}

impl RateGate {
    pub fn new(max_messages: u32, window_duration: Duration, now: Instant) -> Self {
        Self {
            max_messages,
            window_duration,
            message_count: 0,
            window_start: now,
        }
    }

    pub fn from_config(config: &HubConfig, now: Instant) -> Self {
        Self::new(config.max_messages_per_second, config.rate_window(), now)
    }

    /// 记录一条消息并返回是否放行
    ///
    /// 被拒绝的消息同样计数，直到窗口过期才会重置。
    pub fn allow(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= self.window_duration {
            self.message_count = 0;
            self.window_start = now;
        }

        self.message_count = self.message_count.saturating_add(1);
        self.message_count <= self.max_messages
    }

    /// 当前窗口内已记录的消息数
    pub fn message_count(&self) -> u32 {
        self.message_count
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }
}
