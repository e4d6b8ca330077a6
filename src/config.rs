use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::merge::TargetCountRule;

pub const DB_PATH_ENV: &str = "CHOREO_DB_PATH";
pub const PLATFORM_API_KEY_ENV: &str = "BASE44_API_KEY";
pub const PLATFORM_API_URL_ENV: &str = "BASE44_API_URL";
pub const PLATFORM_APP_ID_ENV: &str = "BASE44_APP_ID";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";
pub const OPENAI_BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const OPENAI_TIMEOUT_ENV: &str = "OPENAI_TIMEOUT_SECONDS";
pub const WEB_BIND_ENV: &str = "CHOREO_WEB_BIND";
pub const TOOL_TARGET_RULE_ENV: &str = "CHOREO_TOOL_TARGET_RULE";
pub const WEB_TARGET_RULE_ENV: &str = "CHOREO_WEB_TARGET_RULE";

const DEFAULT_PLATFORM_API_URL: &str = "https://app.base44.com/api";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_TIMEOUT_SECS: u64 = 45;
const DEFAULT_WEB_BIND: &str = "127.0.0.1:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Credentials for the upstream application platform. Present only when both
/// the API key and the app id are configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConfig {
    pub api_key: String,
    pub api_url: String,
    pub app_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub platform: Option<PlatformConfig>,
    pub generator: GeneratorConfig,
    pub web_bind: String,
    /// Target-count rule used by the MCP playlist tools.
    pub tool_target_rule: TargetCountRule,
    /// Target-count rule used by the web API.
    pub web_target_rule: TargetCountRule,
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("choreo")
        .join("catalog.sqlite3")
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let db_path = get(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let platform = match (get(PLATFORM_API_KEY_ENV), get(PLATFORM_APP_ID_ENV)) {
            (Some(api_key), Some(app_id)) => Some(PlatformConfig {
                api_key,
                app_id,
                api_url: get(PLATFORM_API_URL_ENV)
                    .unwrap_or_else(|| DEFAULT_PLATFORM_API_URL.to_string()),
            }),
            _ => None,
        };

        let timeout_secs = match get(OPENAI_TIMEOUT_ENV) {
            Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                key: OPENAI_TIMEOUT_ENV,
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_OPENAI_TIMEOUT_SECS,
        };

        let generator = GeneratorConfig {
            api_key: get(OPENAI_API_KEY_ENV),
            model: get(OPENAI_MODEL_ENV).unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            base_url: get(OPENAI_BASE_URL_ENV)
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
        };

        Ok(Self {
            db_path,
            platform,
            generator,
            web_bind: get(WEB_BIND_ENV).unwrap_or_else(|| DEFAULT_WEB_BIND.to_string()),
            tool_target_rule: parse_rule(
                TOOL_TARGET_RULE_ENV,
                get(TOOL_TARGET_RULE_ENV),
                TargetCountRule::DurationBuckets,
            )?,
            web_target_rule: parse_rule(
                WEB_TARGET_RULE_ENV,
                get(WEB_TARGET_RULE_ENV),
                TargetCountRule::QuarterDuration,
            )?,
        })
    }
}

fn parse_rule(
    key: &'static str,
    raw: Option<String>,
    default: TargetCountRule,
) -> Result<TargetCountRule, ConfigError> {
    match raw {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key,
            value: raw.clone(),
            reason: "expected 'buckets' or 'quarter'".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_leave_collaborators_disabled() {
        let config = config_from(&[]).expect("empty env should be valid");
        assert!(config.platform.is_none());
        assert!(config.generator.api_key.is_none());
        assert_eq!(config.generator.model, "gpt-4o-mini");
        assert_eq!(config.generator.timeout, Duration::from_secs(45));
        assert_eq!(config.tool_target_rule, TargetCountRule::DurationBuckets);
        assert_eq!(config.web_target_rule, TargetCountRule::QuarterDuration);
        assert!(config.db_path.ends_with("choreo/catalog.sqlite3"));
    }

    #[test]
    fn platform_requires_key_and_app_id() {
        let only_key = config_from(&[(PLATFORM_API_KEY_ENV, "k")]).unwrap();
        assert!(only_key.platform.is_none());

        let both = config_from(&[
            (PLATFORM_API_KEY_ENV, "k"),
            (PLATFORM_APP_ID_ENV, "app-1"),
        ])
        .unwrap();
        let platform = both.platform.expect("platform should be configured");
        assert_eq!(platform.api_url, "https://app.base44.com/api");
        assert_eq!(platform.app_id, "app-1");
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[(OPENAI_API_KEY_ENV, "   "), (DB_PATH_ENV, "")]).unwrap();
        assert!(config.generator.api_key.is_none());
        assert_eq!(config.db_path, default_db_path());
    }

    #[test]
    fn invalid_timeout_names_the_key() {
        let err = config_from(&[(OPENAI_TIMEOUT_ENV, "soon")]).unwrap_err();
        let ConfigError::InvalidValue { key, value, .. } = err;
        assert_eq!(key, OPENAI_TIMEOUT_ENV);
        assert_eq!(value, "soon");
    }

    #[test]
    fn target_rules_are_configurable() {
        let config = config_from(&[
            (TOOL_TARGET_RULE_ENV, "quarter"),
            (WEB_TARGET_RULE_ENV, "buckets"),
        ])
        .unwrap();
        assert_eq!(config.tool_target_rule, TargetCountRule::QuarterDuration);
        assert_eq!(config.web_target_rule, TargetCountRule::DurationBuckets);

        let err = config_from(&[(WEB_TARGET_RULE_ENV, "fibonacci")]).unwrap_err();
        assert!(err.to_string().contains(WEB_TARGET_RULE_ENV));
    }
}
