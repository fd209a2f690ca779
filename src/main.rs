use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doc_hook::config::Config;
use doc_hook::dispatch::DispatchClient;
use doc_hook::notify::Notifier;
use doc_hook::registry::RunRegistry;
use doc_hook::server::{AppState, build_router};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "doc_hook=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    let dispatch = DispatchClient::new(config.worker_endpoint.clone(), config.http_timeout)
        .expect("failed to build worker HTTP client");
    let notifier = Notifier::new(
        config.provider_api.clone(),
        config.provider_token.clone(),
        config.public_base.clone(),
        config.http_timeout,
    )
    .expect("failed to build provider HTTP client");

    let state = AppState::new(
        RunRegistry::new(),
        dispatch,
        notifier,
        config.webhook_secret.as_bytes().to_vec(),
        config.public_base.clone(),
    );
    let app = build_router(state);

    tracing::info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .expect("failed to bind listen address");
    axum::serve(listener, app).await.expect("server error");
}
