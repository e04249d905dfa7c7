use crate::config::Settings;
use serde::Serialize;

/// Who a request was authorized as. Executors record this as `created_by`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    ApiKey,
    AdminEmail(String),
}

impl Caller {
    pub fn email(&self) -> Option<&str> {
        match self {
            Caller::ApiKey => None,
            Caller::AdminEmail(email) => Some(email),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorReason {
    InvalidApiKey,
    MissingApiKeyConfiguration,
    AdminEmailRequired,
}

impl AuthErrorReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidApiKey => "invalid_api_key",
            Self::MissingApiKeyConfiguration => "missing_api_key_configuration",
            Self::AdminEmailRequired => "admin_email_required",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct AuthError {
    pub reason: AuthErrorReason,
    pub message: String,
}

impl AuthError {
    fn new(reason: AuthErrorReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Authorizes a request either by API key or, outside production, by an
/// admin-allowlisted caller email. The reasons are distinct so operators can
/// tell server misconfiguration from a bad caller.
pub fn authorize(
    settings: &Settings,
    api_key: Option<&str>,
    caller_email: Option<&str>,
) -> Result<Caller, AuthError> {
    if let Some(provided) = api_key.map(str::trim).filter(|key| !key.is_empty()) {
        let Some(expected) = settings.api_key.as_deref() else {
            return Err(AuthError::new(
                AuthErrorReason::MissingApiKeyConfiguration,
                "the server has no API key configured",
            ));
        };
        if provided != expected {
            return Err(AuthError::new(
                AuthErrorReason::InvalidApiKey,
                "the supplied API key is not valid",
            ));
        }
        return Ok(Caller::ApiKey);
    }

    if settings.environment.is_production() {
        return Err(AuthError::new(
            AuthErrorReason::InvalidApiKey,
            "an API key is required in production",
        ));
    }

    // Development fallback: a caller email on the admin allowlist (exact
    // address or bare domain) stands in for the key.
    let email = caller_email
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_ascii_lowercase)
        .ok_or_else(|| {
            AuthError::new(
                AuthErrorReason::AdminEmailRequired,
                "an admin caller email is required when no API key is supplied",
            )
        })?;

    if settings.admin_emails.iter().any(|admin| admin == &email) {
        return Ok(Caller::AdminEmail(email));
    }
    if let Some(domain) = email.rsplit_once('@').map(|(_, domain)| domain) {
        if settings.admin_domains.iter().any(|admin| admin == domain) {
            return Ok(Caller::AdminEmail(email));
        }
    }
    Err(AuthError::new(
        AuthErrorReason::AdminEmailRequired,
        format!("`{email}` is not on the admin allowlist"),
    ))
}
