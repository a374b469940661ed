//! 统一配置中心
//!
//! 提供聊天枢纽的全局配置管理，包括：
//! - 服务监听地址
//! - 枢纽限流与队列容量
//! - 连接心跳
//!
//! 加载顺序：默认值 -> 可选配置文件（`CHAT_HUB_CONFIG_FILE`）-> 环境变量（`CHAT_HUB_*`，
//! 嵌套字段用 `__` 分隔，例如 `CHAT_HUB_HUB__OUTBOUND_QUEUE_CAPACITY=128`）。

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHAT_HUB_";
/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHAT_HUB_CONFIG_FILE";

/// 每个连接每秒允许的上行消息数
pub const DEFAULT_MAX_MESSAGES_PER_SECOND: u32 = 10;
/// 每个连接下行队列的默认容量
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 64;

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 服务配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// 枢纽配置
    #[validate(nested)]
    #[serde(default)]
    pub hub: HubConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 枢纽配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// 每个连接在一个时间窗口内允许的上行消息数
    #[validate(range(min = 1))]
    pub max_messages_per_second: u32,
    /// 限流窗口长度（毫秒）
    #[validate(range(min = 1))]
    pub rate_window_ms: u64,
    /// 每个连接下行队列的容量，必须为有限正数
    #[validate(range(min = 1, max = 65536))]
    pub outbound_queue_capacity: usize,
    /// 服务端 ping 间隔（秒），0 表示关闭心跳
    pub heartbeat_interval_secs: u64,
}

impl HubConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_messages_per_second: DEFAULT_MAX_MESSAGES_PER_SECOND,
            rate_window_ms: 1000,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            heartbeat_interval_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 配置文件 -> 环境变量的顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    /// 构造分层配置源
    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 从任意配置源提取并校验
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}
