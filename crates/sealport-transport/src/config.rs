use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::MAX_PLAINTEXT_FRAGMENT;

pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "SEALPORT_HANDSHAKE_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "SEALPORT_POLL_INTERVAL_MS";
pub const ENV_CHUNK_UNIT_SIZE: &str = "SEALPORT_CHUNK_UNIT_SIZE";

const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// 握手与分帧的可调参数。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - `handshake_timeout_ms`：非阻塞握手的截止时间，默认 30 秒；
/// - `poll_interval_ms`：就绪等待的单次轮询上限，决定超时判定的最大延迟；
/// - `chunk_unit_size`：分帧器每个加密单元的明文字节数，不得超过 16 KiB；
/// - `max_frame_size`：解帧时接受的最大密文长度。
///
/// ## 逻辑（How）
/// - 可从 TOML 片段反序列化，缺省字段取默认值，未知字段被拒绝；
/// - [`apply_env`](Self::apply_env) 以 `SEALPORT_*` 环境变量覆盖对应字段；
/// - 所有入口最终都经过 [`validate`](Self::validate)。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HandshakeConfig {
    pub handshake_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub chunk_unit_size: usize,
    pub max_frame_size: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            chunk_unit_size: MAX_PLAINTEXT_FRAGMENT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl HandshakeConfig {
    /// 解析 TOML 片段并校验。
    pub fn from_toml_str(source: &str) -> crate::Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    #[inline]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout_ms = duration_to_millis(timeout);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_to_millis(interval);
        self
    }

    pub fn with_chunk_unit_size(mut self, unit: usize) -> Self {
        self.chunk_unit_size = unit;
        self
    }

    pub fn with_max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = limit;
        self
    }

    /// 读取进程环境变量覆盖配置。
    pub fn apply_env(self) -> crate::Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// 以自定义查找函数覆盖配置，便于测试注入。
    pub fn apply_env_with<F>(mut self, lookup: F) -> crate::Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_HANDSHAKE_TIMEOUT_MS) {
            self.handshake_timeout_ms = parse_env(ENV_HANDSHAKE_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_POLL_INTERVAL_MS) {
            self.poll_interval_ms = parse_env(ENV_POLL_INTERVAL_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_CHUNK_UNIT_SIZE) {
            self.chunk_unit_size = parse_env(ENV_CHUNK_UNIT_SIZE, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> crate::Result<(), ConfigError> {
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::invalid("handshake_timeout_ms", "must be positive"));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("poll_interval_ms", "must be positive"));
        }
        if self.chunk_unit_size == 0 || self.chunk_unit_size > MAX_PLAINTEXT_FRAGMENT {
            return Err(ConfigError::invalid(
                "chunk_unit_size",
                "must be within 1..=16384",
            ));
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::invalid("max_frame_size", "must be positive"));
        }
        Ok(())
    }
}

/// 配置解析或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid handshake config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
    #[error("environment variable {var}={value:?} is not a valid number")]
    Env { var: &'static str, value: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::Invalid { field, reason }
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> crate::Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var,
        value: value.to_owned(),
    })
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = HandshakeConfig::default();
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.chunk_unit_size, 16 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn toml_overrides_only_given_fields() {
        let config = HandshakeConfig::from_toml_str("handshake_timeout_ms = 500\n").unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(500));
        assert_eq!(config.poll_interval_ms, 10);
    }

    #[test]
    fn unknown_toml_fields_are_rejected() {
        let err = HandshakeConfig::from_toml_str("handshake_timeout = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn oversized_unit_is_rejected() {
        let err = HandshakeConfig::from_toml_str("chunk_unit_size = 20000\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "chunk_unit_size",
                ..
            }
        ));
    }

    #[test]
    fn env_lookup_overrides_and_validates() {
        let config = HandshakeConfig::default()
            .apply_env_with(|key| match key {
                ENV_HANDSHAKE_TIMEOUT_MS => Some("1500".to_owned()),
                ENV_CHUNK_UNIT_SIZE => Some(" 4096 ".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.handshake_timeout(), Duration::from_millis(1500));
        assert_eq!(config.chunk_unit_size, 4096);

        let err = HandshakeConfig::default()
            .apply_env_with(|key| (key == ENV_POLL_INTERVAL_MS).then(|| "soon".to_owned()))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Env {
                var: ENV_POLL_INTERVAL_MS,
                ..
            }
        ));
    }
}
