use anyhow::Context;
use docrag::{api, config, logging, service::RagService};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_config();
    logging::init_tracing();
    let service = RagService::from_config(config::get_config())
        .await
        .context("Failed to initialize RAG service")?;
    let app = api::create_router(Arc::new(service));

    let (listener, port) = bind_listener().await.context("Failed to bind listener")?;
    tracing::info!(port, "docrag API listening");
    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

const FALLBACK_PORTS: std::ops::RangeInclusive<u16> = 8000..=8099;

/// Binds `SERVER_PORT` when set, otherwise the first free port in [`FALLBACK_PORTS`].
async fn bind_listener() -> std::io::Result<(TcpListener, u16)> {
    let address = std::net::Ipv4Addr::UNSPECIFIED;
    if let Some(port) = config::get_config().server_port {
        let listener = TcpListener::bind((address, port)).await?;
        return Ok((listener, port));
    }

    for port in FALLBACK_PORTS {
        match TcpListener::bind((address, port)).await {
            Ok(listener) => return Ok((listener, port)),
            Err(error) if error.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port taken");
            }
            Err(error) => return Err(error),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!(
            "no free port between {} and {}",
            FALLBACK_PORTS.start(),
            FALLBACK_PORTS.end()
        ),
    ))
}
