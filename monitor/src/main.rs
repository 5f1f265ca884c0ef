use ractor::Actor;

use monitor::actors::{
    PollSchedulerActor, PollSchedulerArguments, PushChannelActor, PushChannelArguments,
    TraceStoreActor, TraceStoreArguments, TraceStoreMsg,
};
use monitor::client::TraceApiClient;
use monitor::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    tracing::info!(
        api = %config.api_base_url,
        events = %config.events_url,
        "Starting trace monitor"
    );

    let client = TraceApiClient::new(config.api_base_url.clone());

    let (store, store_handle) = Actor::spawn(
        Some("trace_store".to_string()),
        TraceStoreActor,
        TraceStoreArguments {
            client: client.clone(),
        },
    )
    .await?;

    let (scheduler, scheduler_handle) = Actor::spawn(
        Some("poll_scheduler".to_string()),
        PollSchedulerActor,
        PollSchedulerArguments {
            client: client.clone(),
            store: store.clone(),
            active_interval: config.active_poll_interval,
            idle_interval: config.idle_poll_interval,
            detail_interval: config.detail_poll_interval,
        },
    )
    .await?;
    store
        .cast(TraceStoreMsg::BindScheduler {
            scheduler: scheduler.clone(),
        })
        .map_err(|e| anyhow::anyhow!("Failed to bind scheduler: {e}"))?;

    let (push_channel, push_handle) = Actor::spawn(
        Some("push_channel".to_string()),
        PushChannelActor,
        PushChannelArguments {
            events_url: config.events_url.clone(),
            store: store.clone(),
            client,
            reconnect_delay: config.reconnect_delay,
        },
    )
    .await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down trace monitor");

    // Deterministic teardown: stopping the actors aborts every pending
    // timer and the stream reader in their post_stop hooks.
    push_channel.stop(None);
    scheduler.stop(None);
    store.stop(None);
    let _ = tokio::join!(push_handle, scheduler_handle, store_handle);

    Ok(())
}
