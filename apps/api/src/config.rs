use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::evaluation::batch::BatchSettings;
use crate::evaluation::credentials::PoolPolicy;
use crate::evaluation::executor::RetryPolicy;
use crate::evaluation::qualification::QualificationPolicy;
use crate::evaluation::stages::{StageCatalog, StageKind, StageLimits};

/// Numbered credential variables are read from 1 up to this index.
const MAX_NUMBERED_KEYS: usize = 5;

/// Analysis service settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Application configuration loaded from environment variables.
/// Startup fails if no credential is configured or a value does not parse.
#[derive(Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub port: u16,
    pub rust_log: String,
    /// Secrets in pool order. Never logged.
    pub credentials: Vec<String>,
    pub llm: LlmSettings,
    pub default_limits: StageLimits,
    pub stage_limits: HashMap<StageKind, StageLimits>,
    pub qualification: QualificationPolicy,
    pub batch: BatchSettings,
    pub retry: RetryPolicy,
    pub pool: PoolPolicy,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .field("rust_log", &self.rust_log)
            .field("credentials", &self.credentials.len())
            .field("llm", &self.llm)
            .field("default_limits", &self.default_limits)
            .field("qualification", &self.qualification)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut credentials: Vec<String> = (1..=MAX_NUMBERED_KEYS)
            .filter_map(|i| get(&format!("OPENROUTER_API_KEY_{i}")))
            .collect();
        if credentials.is_empty() {
            credentials.extend(get("OPENROUTER_API_KEY"));
        }
        if credentials.is_empty() {
            bail!(
                "No analysis credentials configured: set OPENROUTER_API_KEY_1..{MAX_NUMBERED_KEYS} or OPENROUTER_API_KEY"
            );
        }

        let default_limits = StageLimits {
            max_retries: parse_or(&get, "EVAL_MAX_RETRIES", 3)?,
            timeout: Duration::from_secs(parse_or(&get, "EVAL_STAGE_TIMEOUT_SECS", 120)?),
        };
        let mut stage_limits = HashMap::new();
        for kind in StageKind::ALL {
            let retries_key = format!("EVAL_{}_MAX_RETRIES", kind.env_key());
            let timeout_key = format!("EVAL_{}_TIMEOUT_SECS", kind.env_key());
            let limits = StageLimits {
                max_retries: parse_or(&get, &retries_key, default_limits.max_retries)?,
                timeout: Duration::from_secs(parse_or(
                    &get,
                    &timeout_key,
                    default_limits.timeout.as_secs(),
                )?),
            };
            if limits != default_limits {
                stage_limits.insert(kind, limits);
            }
        }

        let threshold: u8 = parse_or(&get, "QUALIFICATION_THRESHOLD", 75)?;
        let ceiling: u8 = parse_or(&get, "OVERQUALIFICATION_CEILING", 90)?;
        if threshold > 100 || ceiling > 100 {
            bail!("QUALIFICATION_THRESHOLD and OVERQUALIFICATION_CEILING must be within 0..=100");
        }

        Ok(Config {
            database_url: get("DATABASE_URL"),
            port: parse_or(&get, "PORT", 8080)?,
            rust_log: get("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            credentials,
            llm: LlmSettings {
                base_url: get("LLM_BASE_URL")
                    .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string()),
                model: get("LLM_MODEL").unwrap_or_else(|| "openai/gpt-3.5-turbo".to_string()),
                temperature: parse_or(&get, "LLM_TEMPERATURE", 0.1)?,
                max_tokens: parse_or(&get, "LLM_MAX_TOKENS", 1000)?,
            },
            default_limits,
            stage_limits,
            qualification: QualificationPolicy {
                threshold,
                overqualification_ceiling: Some(ceiling),
            },
            batch: BatchSettings {
                max_concurrency: parse_or(&get, "BATCH_MAX_CONCURRENCY", 4)?,
                max_batch_size: parse_or(&get, "MAX_RESUMES_PER_BATCH", 50)?,
                requirements_cache_capacity: parse_or(&get, "REQUIREMENTS_CACHE_CAPACITY", 64)?,
                retention: Duration::from_secs(parse_or(&get, "BATCH_RETENTION_SECS", 3600)?),
            },
            retry: RetryPolicy {
                base_delay: Duration::from_millis(parse_or(&get, "RETRY_BACKOFF_BASE_MS", 500)?),
                max_delay: Duration::from_millis(parse_or(&get, "RETRY_BACKOFF_MAX_MS", 8000)?),
            },
            pool: PoolPolicy {
                cooldown: Duration::from_secs(parse_or(&get, "CREDENTIAL_COOLDOWN_SECS", 60)?),
                failure_limit: parse_or(&get, "CREDENTIAL_FAILURE_LIMIT", 3)?,
            },
        })
    }

    pub fn stage_catalog(&self) -> StageCatalog {
        StageCatalog::new(|kind| {
            self.stage_limits
                .get(&kind)
                .copied()
                .unwrap_or(self.default_limits)
        })
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_single_key() {
        let config = config(&[("OPENROUTER_API_KEY", "sk-only")]).unwrap();
        assert_eq!(config.credentials, vec!["sk-only"]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.llm.model, "openai/gpt-3.5-turbo");
        assert_eq!(config.default_limits.max_retries, 3);
        assert_eq!(config.default_limits.timeout, Duration::from_secs(120));
        assert_eq!(config.qualification.threshold, 75);
        assert_eq!(config.qualification.overqualification_ceiling, Some(90));
        assert_eq!(config.batch.max_batch_size, 50);
        assert_eq!(config.batch.requirements_cache_capacity, 64);
        assert_eq!(config.batch.retention, Duration::from_secs(3600));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_batch_retention_and_cache_capacity_overrides() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "sk-only"),
            ("BATCH_RETENTION_SECS", "120"),
            ("REQUIREMENTS_CACHE_CAPACITY", "8"),
        ])
        .unwrap();
        assert_eq!(config.batch.retention, Duration::from_secs(120));
        assert_eq!(config.batch.requirements_cache_capacity, 8);
    }

    #[test]
    fn test_numbered_keys_take_precedence_in_order() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "sk-fallback"),
            ("OPENROUTER_API_KEY_1", "sk-1"),
            ("OPENROUTER_API_KEY_3", "sk-3"),
        ])
        .unwrap();
        assert_eq!(config.credentials, vec!["sk-1", "sk-3"]);
    }

    #[test]
    fn test_missing_credentials_fail() {
        let err = config(&[("PORT", "9000")]).unwrap_err();
        assert!(err.to_string().contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn test_per_stage_overrides() {
        let config = config(&[
            ("OPENROUTER_API_KEY", "sk"),
            ("EVAL_MAX_RETRIES", "2"),
            ("EVAL_QUALITY_ASSURANCE_TIMEOUT_SECS", "30"),
        ])
        .unwrap();
        let catalog = config.stage_catalog();
        assert_eq!(catalog.spec(StageKind::ResumeAnalyzer).max_retries, 2);
        let qa = catalog.spec(StageKind::QualityAssurance);
        assert_eq!(qa.max_retries, 2);
        assert_eq!(qa.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = config(&[("OPENROUTER_API_KEY", "sk"), ("BATCH_MAX_CONCURRENCY", "many")])
            .unwrap_err();
        assert!(err.to_string().contains("BATCH_MAX_CONCURRENCY"));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = config(&[("OPENROUTER_API_KEY", "sk-very-secret")]).unwrap();
        assert!(!format!("{config:?}").contains("sk-very-secret"));
    }
}
