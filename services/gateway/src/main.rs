use std::env;

use gateway::{Config, Gateway};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(log_level)).init();

    let config_path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "gateway.toml".to_owned());
    let config_text = std::fs::read_to_string(&config_path)
        .unwrap_or_else(|err| panic!("failed to read {config_path}: {err}"));
    let config: Config = toml::from_str(&config_text).expect("invalid gateway config");
    let bind_addr = config.bind_addr.clone();

    let gateway = Gateway::new(config);
    let router = gateway::build_router(&gateway);

    let v11_outbound = onebot_v11::spawn_outbound_clients(gateway.v11.clone());
    let v12_outbound = onebot_v12::spawn_outbound_clients(gateway.v12.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.expect("failed to bind");
    info!(addr = %bind_addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    for handle in v11_outbound.into_iter().chain(v12_outbound) {
        handle.abort();
    }
    info!("gateway shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
