use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Router, extract::State};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use microstack::AppState;
use microstack::config::MicrostackConfig;
use microstack::function_registry::FunctionRegistry;
use microstack::handlers::{functions, health, logs, objects, stacks};
use microstack::log_ledger::LogLedger;
use microstack::object_store::ObjectStore;
use microstack::stack_orchestrator::StackOrchestrator;

/// `POST /` is shared by the Log API (AWS JSON 1.1, selected by the
/// presence of `X-Amz-Target`) and the Stack API (Query/XML form body) —
/// the dialects are otherwise unrelated, so this just routes by header
/// before handing off to each dialect's own dispatcher.
async fn root_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if headers.contains_key("x-amz-target") {
        logs::handle_logs_request(State(state), headers, body).await
    } else {
        stacks::handle_stacks_request(State(state), body).await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter_directive = std::env::var("MICROSTACK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "microstack=info,tower_http=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_directive))
        .init();

    let config = Arc::new(MicrostackConfig::from_env()?);

    let log_ledger = Arc::new(LogLedger::new());
    let object_store = Arc::new(ObjectStore::new());
    let function_registry = Arc::new(FunctionRegistry::new());
    let stack_orchestrator = Arc::new(StackOrchestrator::new(
        function_registry.clone(),
        log_ledger.clone(),
        object_store.clone(),
    ));

    let state = AppState { log_ledger, object_store, function_registry, stack_orchestrator, config: config.clone() };

    let app = Router::new()
        .route("/microstack/health", get(health::healthz))
        .route(
            "/2015-03-31/functions",
            axum::routing::post(functions::create_function).get(functions::list_functions),
        )
        .route(
            "/2015-03-31/functions/{name}",
            get(functions::get_function).delete(functions::delete_function),
        )
        .route("/2015-03-31/functions/{name}/configuration", put(functions::update_function_configuration))
        .route("/2015-03-31/functions/{name}/code", put(functions::update_function_code))
        .route("/2015-03-31/functions/{name}/invocations", axum::routing::post(functions::invoke_function))
        .route("/", axum::routing::post(root_post).get(objects::list_buckets))
        .route(
            "/{bucket}",
            put(objects::create_bucket)
                .delete(objects::delete_bucket)
                .head(objects::head_bucket)
                .get(objects::list_objects_v2),
        )
        .route(
            "/{bucket}/{*key}",
            put(objects::put_object)
                .get(objects::get_object)
                .delete(objects::delete_object)
                .head(objects::head_object),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("microstack listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
