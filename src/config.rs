use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {name} is required but not set")]
    MissingEnv { name: String },
    #[error("environment variable {name} is invalid: {reason}")]
    InvalidEnv { name: String, reason: String },
}

pub const ENV_API_KEY: &str = "STATWARD_API_KEY";
pub const ENV_ADMIN_EMAILS: &str = "STATWARD_ADMIN_EMAILS";
pub const ENV_ADMIN_DOMAINS: &str = "STATWARD_ADMIN_DOMAINS";
pub const ENV_ENVIRONMENT: &str = "STATWARD_ENV";
pub const ENV_STATE_ROOT: &str = "STATWARD_STATE_ROOT";
pub const ENV_STORE_BASE_URL: &str = "STATWARD_STORE_BASE_URL";
pub const ENV_STORE_APP_ID: &str = "STATWARD_STORE_APP_ID";
pub const ENV_STORE_ADMIN_TOKEN: &str = "STATWARD_STORE_ADMIN_TOKEN";
pub const ENV_CENSUS_BASE_URL: &str = "STATWARD_CENSUS_BASE_URL";
pub const ENV_CENSUS_API_KEY: &str = "STATWARD_CENSUS_API_KEY";
pub const ENV_ORACLE_BASE_URL: &str = "STATWARD_ORACLE_BASE_URL";
pub const ENV_ORACLE_API_KEY: &str = "STATWARD_ORACLE_API_KEY";
pub const ENV_ORACLE_MODEL: &str = "STATWARD_ORACLE_MODEL";
pub const ENV_LISTEN_ADDR: &str = "STATWARD_LISTEN_ADDR";

const DEFAULT_STATE_ROOT: &str = ".statward";
const DEFAULT_CENSUS_BASE_URL: &str = "https://api.census.gov/data";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_ORACLE_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "development" | "dev" | "" => Ok(Self::Development),
            other => Err(format!(
                "expected `production` or `development`, got `{other}`"
            )),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Boundary configuration. The orchestration core never reads the
/// environment directly; everything external arrives through this struct.
#[derive(Debug, Clone)]
pub struct Settings {
    pub environment: Environment,
    pub api_key: Option<String>,
    pub admin_emails: Vec<String>,
    pub admin_domains: Vec<String>,
    pub state_root: PathBuf,
    pub store_base_url: Option<String>,
    pub store_app_id: Option<String>,
    pub store_admin_token: Option<String>,
    pub census_base_url: String,
    pub census_api_key: Option<String>,
    pub oracle_base_url: Option<String>,
    pub oracle_api_key: Option<String>,
    pub oracle_model: String,
    pub listen_addr: String,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::parse(&env_or_default(ENV_ENVIRONMENT, "")).map_err(
            |reason| ConfigError::InvalidEnv {
                name: ENV_ENVIRONMENT.to_string(),
                reason,
            },
        )?;

        let settings = Self {
            environment,
            api_key: env_non_empty(ENV_API_KEY),
            admin_emails: env_list(ENV_ADMIN_EMAILS),
            admin_domains: env_list(ENV_ADMIN_DOMAINS),
            state_root: PathBuf::from(env_or_default(ENV_STATE_ROOT, DEFAULT_STATE_ROOT)),
            store_base_url: env_non_empty(ENV_STORE_BASE_URL),
            store_app_id: env_non_empty(ENV_STORE_APP_ID),
            store_admin_token: env_non_empty(ENV_STORE_ADMIN_TOKEN),
            census_base_url: env_or_default(ENV_CENSUS_BASE_URL, DEFAULT_CENSUS_BASE_URL),
            census_api_key: env_non_empty(ENV_CENSUS_API_KEY),
            oracle_base_url: env_non_empty(ENV_ORACLE_BASE_URL),
            oracle_api_key: env_non_empty(ENV_ORACLE_API_KEY),
            oracle_model: env_or_default(ENV_ORACLE_MODEL, DEFAULT_ORACLE_MODEL),
            listen_addr: env_or_default(ENV_LISTEN_ADDR, DEFAULT_LISTEN_ADDR),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for email in &self.admin_emails {
            if !email.contains('@') {
                return Err(ConfigError::InvalidEnv {
                    name: ENV_ADMIN_EMAILS.to_string(),
                    reason: format!("`{email}` is not an email address"),
                });
            }
        }
        for domain in &self.admin_domains {
            if domain.contains('@') || domain.is_empty() {
                return Err(ConfigError::InvalidEnv {
                    name: ENV_ADMIN_DOMAINS.to_string(),
                    reason: format!("`{domain}` is not a bare domain"),
                });
            }
        }
        if self.environment.is_production() && self.api_key.is_none() {
            return Err(ConfigError::MissingEnv {
                name: ENV_API_KEY.to_string(),
            });
        }
        Ok(())
    }

    /// Store connectivity is required only when a request actually reaches
    /// the store, so it is checked lazily rather than at startup.
    pub fn require_store(&self) -> Result<StoreCredentials, ConfigError> {
        let base_url = self.store_base_url.clone().ok_or(ConfigError::MissingEnv {
            name: ENV_STORE_BASE_URL.to_string(),
        })?;
        let app_id = self.store_app_id.clone().ok_or(ConfigError::MissingEnv {
            name: ENV_STORE_APP_ID.to_string(),
        })?;
        let admin_token = self
            .store_admin_token
            .clone()
            .ok_or(ConfigError::MissingEnv {
                name: ENV_STORE_ADMIN_TOKEN.to_string(),
            })?;
        Ok(StoreCredentials {
            base_url,
            app_id,
            admin_token,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreCredentials {
    pub base_url: String,
    pub app_id: String,
    pub admin_token: String,
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_list(name: &str) -> Vec<String> {
    std::env::var(name)
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(|entry| entry.trim().to_ascii_lowercase())
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default()
}
