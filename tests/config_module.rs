use statward::config::{Settings, ENV_ADMIN_DOMAINS, ENV_ADMIN_EMAILS, ENV_API_KEY, ENV_ENVIRONMENT};

fn clear() {
    for name in [
        ENV_ENVIRONMENT,
        ENV_API_KEY,
        ENV_ADMIN_EMAILS,
        ENV_ADMIN_DOMAINS,
        "STATWARD_STATE_ROOT",
        "STATWARD_STORE_BASE_URL",
        "STATWARD_STORE_APP_ID",
        "STATWARD_STORE_ADMIN_TOKEN",
        "STATWARD_CENSUS_BASE_URL",
        "STATWARD_CENSUS_API_KEY",
        "STATWARD_ORACLE_BASE_URL",
        "STATWARD_ORACLE_API_KEY",
        "STATWARD_ORACLE_MODEL",
        "STATWARD_LISTEN_ADDR",
    ] {
        std::env::remove_var(name);
    }
}

// Environment variables are process-global, so every scenario lives in one
// test to keep the suite parallel-safe.
#[test]
fn settings_cover_defaults_lists_and_production_checks() {
    clear();

    // Bare environment: development defaults, no store credentials.
    let settings = Settings::from_env().expect("defaults");
    assert!(!settings.environment.is_production());
    assert_eq!(settings.state_root.to_str(), Some(".statward"));
    assert_eq!(settings.census_base_url, "https://api.census.gov/data");
    assert_eq!(settings.listen_addr, "127.0.0.1:8790");
    assert!(settings.api_key.is_none());
    assert!(settings.require_store().is_err());

    // Comma-separated allowlists are trimmed and lowercased.
    std::env::set_var(ENV_ADMIN_EMAILS, " Boss@Example.com , ops@example.com ");
    std::env::set_var(ENV_ADMIN_DOMAINS, "example.org");
    let settings = Settings::from_env().expect("lists");
    assert_eq!(
        settings.admin_emails,
        vec!["boss@example.com", "ops@example.com"]
    );
    assert_eq!(settings.admin_domains, vec!["example.org"]);

    // A domain in the email list is rejected.
    std::env::set_var(ENV_ADMIN_EMAILS, "example.com");
    assert!(Settings::from_env().is_err());
    std::env::remove_var(ENV_ADMIN_EMAILS);

    // An email in the domain list is rejected.
    std::env::set_var(ENV_ADMIN_DOMAINS, "boss@example.org");
    assert!(Settings::from_env().is_err());
    std::env::remove_var(ENV_ADMIN_DOMAINS);

    // Production requires an API key.
    std::env::set_var(ENV_ENVIRONMENT, "production");
    assert!(Settings::from_env().is_err());
    std::env::set_var(ENV_API_KEY, "secret");
    let settings = Settings::from_env().expect("production with key");
    assert!(settings.environment.is_production());

    // Unknown environment names are rejected.
    std::env::set_var(ENV_ENVIRONMENT, "staging");
    assert!(Settings::from_env().is_err());

    clear();

    // Store credentials resolve once all three are present.
    std::env::set_var("STATWARD_STORE_BASE_URL", "https://store.example.com");
    std::env::set_var("STATWARD_STORE_APP_ID", "app-1");
    std::env::set_var("STATWARD_STORE_ADMIN_TOKEN", "token-1");
    let settings = Settings::from_env().expect("store settings");
    let credentials = settings.require_store().expect("credentials");
    assert_eq!(credentials.base_url, "https://store.example.com");
    assert_eq!(credentials.app_id, "app-1");
    assert_eq!(credentials.admin_token, "token-1");

    clear();
}
