use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use zoomish::config::{self, CallConfig};
use zoomish::media::SyntheticMediaSource;
use zoomish::peer::loopback::LoopbackConnector;
use zoomish::signaling::WsSignalClient;
use zoomish::{CallAgent, CallState, CallView, ClientId, Ringing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    config::init_tracing();
    let config = CallConfig::parse();

    let (transport, inbox) = WsSignalClient::connect(&config.relay, config.token.as_deref())
        .await
        .with_context(|| format!("connecting to {}", config.relay))?;
    let media = SyntheticMediaSource::new(&config.name);
    let (agent, handle) = CallAgent::new(
        &media,
        transport,
        inbox,
        Arc::new(LoopbackConnector),
        config.name.clone(),
    )
    .await;
    let task = agent.spawn();

    let me = handle.wait_for(|view| view.me.is_some()).await?.me;
    if let Some(me) = me {
        info!("my id: {me}");
    }

    let watcher = tokio::spawn(log_transitions(handle.subscribe()));
    if let Some(target) = &config.call {
        handle.call_user(ClientId::new(target.as_str())).await?;
    } else if config.auto_answer {
        handle
            .wait_for(|view| matches!(view.state, CallState::Ringing(Ringing::Inbound { .. })))
            .await?;
        handle.answer_call().await?;
    }

    tokio::select! {
        reason = handle.ended() => info!("call ended: {:?}", reason?),
        _ = tokio::signal::ctrl_c() => handle.leave_call().await?,
    }

    watcher.abort();
    drop(handle);
    task.await?;
    Ok(())
}

async fn log_transitions(mut views: watch::Receiver<CallView>) {
    while views.changed().await.is_ok() {
        let view = views.borrow_and_update().clone();
        match &view.state {
            CallState::Ringing(Ringing::Inbound { invite }) => {
                info!("{} is calling ({})", invite.display_name, invite.from);
            }
            CallState::InCall { peer } => {
                if let Some(remote) = &view.remote {
                    info!("in call with {peer}, receiving {} tracks", remote.tracks.len());
                }
            }
            _ => {}
        }
    }
}
