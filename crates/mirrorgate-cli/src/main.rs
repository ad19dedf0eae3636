use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use mirrorgate_core::backend::{Aria2Client, QbittorrentClient, RetryingBackend};
use mirrorgate_core::domain::format_size;
use mirrorgate_core::impls::{HostProbe, LogNotifier};
use mirrorgate_core::observability::init_tracing;
use mirrorgate_core::queue::RetryPolicy;
use mirrorgate_core::{Settings, Supervisor, SupervisorBuilder};

/// Settings from the path in argv[1], or defaults.
fn load_settings() -> anyhow::Result<Settings> {
    match std::env::args().nth(1) {
        Some(path) => {
            Settings::load(&path).with_context(|| format!("loading settings from {path}"))
        }
        None => Ok(Settings::default()),
    }
}

async fn build(settings: Settings) -> anyhow::Result<Supervisor> {
    let policy = RetryPolicy::from_settings(&settings.backends.retry);
    let timeout = settings.backends.request_timeout();
    let mut builder = SupervisorBuilder::new(settings.clone())
        .notifier(Arc::new(LogNotifier))
        .probe(Arc::new(HostProbe::new()));

    if let Some(aria2) = &settings.backends.aria2 {
        let client = Aria2Client::new(aria2, timeout).context("building aria2 client")?;
        builder = builder.backend(Arc::new(RetryingBackend::new(client, policy.clone())));
    }
    if let Some(qbit) = &settings.backends.qbittorrent {
        let client = QbittorrentClient::new(qbit, timeout).context("building qBittorrent client")?;
        if let Err(err) = client.login().await {
            warn!(error = %err, "qBittorrent login failed, will retry on first call");
        }
        builder = builder.backend(Arc::new(RetryingBackend::new(client, policy)));
    }

    Ok(builder.build()?)
}

async fn report(supervisor: &Supervisor) {
    let counts = supervisor.counts().await;
    let speed = supervisor.backends().overall_speed().await;
    info!(
        registered = counts.registered,
        running_download = counts.running_download,
        queued_download = counts.queued_download,
        running_upload = counts.running_upload,
        queued_upload = counts.queued_upload,
        displaced = counts.displaced,
        warned = counts.warned,
        download = %format!("{}/s", format_size(speed.download)),
        upload = %format!("{}/s", format_size(speed.upload)),
        unreachable = ?speed.unreachable,
        "status"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings()?;
    init_tracing(&settings.log);

    let supervisor = build(settings).await?;
    info!(backends = ?supervisor.backends().names(), "mirrorgate started");
    let handle = supervisor.spawn();

    let mut status = tokio::time::interval(supervisor.sweep_interval());
    loop {
        tokio::select! {
            _ = status.tick() => report(&supervisor).await,
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for ctrl-c")?;
                break;
            }
        }
    }

    info!("shutting down");
    let paused = supervisor.backends().pause_all().await;
    if !paused.is_clean() {
        warn!(unreachable = ?paused.unreachable, "some backends were not paused");
    }
    handle.shutdown_and_join().await;
    Ok(())
}
