use clap::Parser;
use tracing::{info, warn};

use zoomish::auth::Admission;
use zoomish::config::{self, RelayConfig};
use zoomish::relay::{Relay, ws};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();

    let config = RelayConfig::parse();
    let admission = Admission::from_secret(config.jwt_secret.as_deref());
    if admission.is_open() {
        warn!("no JWT_SECRET set, any client may connect and place calls");
    }

    let state = ws::AppState {
        relay: Relay::new(),
        admission,
        ping_interval: config.ping_interval(),
    };
    let app = ws::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    info!("relay listening on ws://{}/socket", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
