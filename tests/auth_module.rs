use statward::auth::{authorize, AuthErrorReason, Caller};
use statward::config::{Environment, Settings};
use std::path::PathBuf;

fn settings(environment: Environment, api_key: Option<&str>) -> Settings {
    Settings {
        environment,
        api_key: api_key.map(str::to_string),
        admin_emails: vec!["boss@example.com".to_string()],
        admin_domains: vec!["example.org".to_string()],
        state_root: PathBuf::from(".statward"),
        store_base_url: None,
        store_app_id: None,
        store_admin_token: None,
        census_base_url: "https://api.census.gov/data".to_string(),
        census_api_key: None,
        oracle_base_url: None,
        oracle_api_key: None,
        oracle_model: "gpt-4o-mini".to_string(),
        listen_addr: "127.0.0.1:8790".to_string(),
    }
}

#[test]
fn a_matching_api_key_authorizes_as_the_key() {
    let settings = settings(Environment::Production, Some("secret"));
    let caller = authorize(&settings, Some("secret"), None).expect("authorized");
    assert_eq!(caller, Caller::ApiKey);
}

#[test]
fn a_wrong_key_is_invalid_even_with_an_admin_email() {
    let settings = settings(Environment::Development, Some("secret"));
    let err = authorize(&settings, Some("wrong"), Some("boss@example.com"))
        .expect_err("the key takes precedence");
    assert_eq!(err.reason, AuthErrorReason::InvalidApiKey);
}

#[test]
fn a_key_without_server_configuration_is_a_config_fault() {
    let settings = settings(Environment::Development, None);
    let err = authorize(&settings, Some("anything"), None).expect_err("no configured key");
    assert_eq!(err.reason, AuthErrorReason::MissingApiKeyConfiguration);
}

#[test]
fn production_never_falls_back_to_emails() {
    let settings = settings(Environment::Production, Some("secret"));
    let err =
        authorize(&settings, None, Some("boss@example.com")).expect_err("key required in prod");
    assert_eq!(err.reason, AuthErrorReason::InvalidApiKey);
}

#[test]
fn development_accepts_allowlisted_emails_and_domains() {
    let settings = settings(Environment::Development, Some("secret"));

    let caller = authorize(&settings, None, Some("boss@example.com")).expect("exact email");
    assert_eq!(caller.email(), Some("boss@example.com"));

    let caller = authorize(&settings, None, Some("Dev@Example.ORG")).expect("domain match");
    assert_eq!(caller.email(), Some("dev@example.org"));
}

#[test]
fn development_still_requires_an_allowlisted_identity() {
    let settings = settings(Environment::Development, Some("secret"));

    let err = authorize(&settings, None, None).expect_err("no identity at all");
    assert_eq!(err.reason, AuthErrorReason::AdminEmailRequired);

    let err = authorize(&settings, None, Some("rando@elsewhere.net")).expect_err("not listed");
    assert_eq!(err.reason, AuthErrorReason::AdminEmailRequired);
}
