use statward::api::{http, ApiState};
use statward::census::HttpCensusApi;
use statward::config::Settings;
use statward::orchestrator::Orchestrator;
use statward::planner::{HttpPlanOracle, PlanOracle};
use statward::store::http::HttpStatStore;
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("statward: {message}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), String> {
    let settings = Settings::from_env().map_err(|err| err.to_string())?;

    let credentials = settings.require_store().map_err(|err| err.to_string())?;
    let store = Arc::new(HttpStatStore::new(&credentials));
    let census = Arc::new(HttpCensusApi::new(
        settings.census_base_url.clone(),
        settings.census_api_key.clone(),
    ));

    // The plan oracle is optional; without it only /execute is served.
    let oracle: Option<Arc<dyn PlanOracle>> =
        match (&settings.oracle_base_url, &settings.oracle_api_key) {
            (Some(base_url), Some(api_key)) => Some(Arc::new(HttpPlanOracle::new(
                base_url,
                api_key,
                &settings.oracle_model,
            ))),
            _ => None,
        };

    let orchestrator = Orchestrator::new(store, census.clone(), settings.state_root.clone());
    let listen_addr = settings.listen_addr.clone();
    let state = Arc::new(ApiState {
        settings,
        orchestrator,
        census,
        oracle,
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| err.to_string())?;
    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(&listen_addr)
            .await
            .map_err(|err| format!("cannot bind {listen_addr}: {err}"))?;
        eprintln!("statward listening on {listen_addr}");
        http::serve(state, listener)
            .await
            .map_err(|err| err.to_string())
    })
}
