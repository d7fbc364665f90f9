//! SMS/MMS alert daemon
//!
//! Wires the platform collaborators (SQLite store, freedesktop notifications,
//! logind lock/inhibitor state, session-snapshot popup handoff) into the
//! alert core and serves the control socket.

mod config;
mod device;
mod listener;
mod notify;
mod popup;
mod store;
mod wake;

use anyhow::{Context, Result};
use clap::Parser;
use sms_alert_core::{
    DecisionEngine, IngestWorker, NotificationPresenter, PopupSession, ReconciliationEngine,
    ReminderScheduler, SLOT_TEST,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use config::Config;
use device::LogindDeviceState;
use listener::ControlListener;
use notify::FreedesktopPresenter;
use popup::SnapshotPopupSurface;
use store::SqliteMessageStore;
use wake::LogindWakeSource;

#[derive(Debug, Parser)]
#[command(name = "sms-alertd", about = "SMS/MMS alert daemon")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the control socket path
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Post a test notification and exit
    #[arg(long)]
    test_notification: bool,
}

struct Daemon {
    config: Config,
    listener: ControlListener,
}

impl Daemon {
    async fn new(config: Config) -> Result<Self> {
        config
            .ensure_directories()
            .context("Failed to create directories")?;

        let store = Arc::new(
            SqliteMessageStore::open(&config.database_path())
                .context("Failed to open message store")?,
        );
        let contacts = Arc::new(store.contact_directory());

        let presenter = Arc::new(
            FreedesktopPresenter::new(config.alert.privacy)
                .await
                .context("Failed to connect to notification service")?,
        );

        let surface = Arc::new(SnapshotPopupSurface::new(config.session_snapshot_path()));

        let system_bus = device::system_bus().await;
        let device = LogindDeviceState::new();
        if let Some(connection) = &system_bus {
            device.spawn_poller(connection.clone());
        }
        let wake = Arc::new(LogindWakeSource::new(system_bus));

        let scheduler = ReminderScheduler::new(device.clone());
        let engine = DecisionEngine::new(
            Arc::new(config.alert.clone()),
            device.clone(),
            presenter.clone(),
            surface.clone(),
            wake.clone(),
            scheduler,
            config.daemon.messaging_app.clone(),
        );

        let session = Arc::new(PopupSession::new(
            engine.clone(),
            store.clone(),
            presenter.clone(),
        ));

        // Resume an alert session that was open when the daemon last stopped
        if let Some(snapshots) = surface.load() {
            info!(messages = snapshots.len(), "resuming previous alert session");
            session.resume(snapshots).await?;
        }

        let reconciler = ReconciliationEngine::new(store.clone(), contacts);
        let handle = IngestWorker::spawn(reconciler, engine, wake);

        let listener = ControlListener::new(
            handle,
            session.clone(),
            store,
            surface.clone(),
            device,
        );

        Ok(Self { config, listener })
    }

    async fn run(self) -> Result<()> {
        let socket_path = self.config.socket_path();
        let socket = ControlListener::bind(&socket_path)?;
        info!(socket = %socket_path.display(), "daemon running");
        info!("Press Ctrl+C to stop");

        tokio::select! {
            _ = self.listener.run(socket) => {}
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for shutdown signal")?;
                info!("Received shutdown signal");
            }
        }

        // Persists any open session and drains accepted arrivals
        self.listener.shutdown().await;

        if let Err(e) = std::fs::remove_file(&socket_path) {
            info!(error = %e, "control socket already removed");
        }
        info!("Daemon shutdown complete");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from(path).context("Failed to load configuration")?,
        None => Config::load().context("Failed to load configuration")?,
    };
    if let Some(socket) = args.socket {
        config.daemon.socket_path = Some(socket);
    }

    if args.test_notification {
        let presenter = FreedesktopPresenter::new(config.alert.privacy)
            .await
            .context("Failed to connect to notification service")?;
        presenter
            .show(&notify::test_message(), SLOT_TEST)
            .await
            .context("Failed to post test notification")?;
        info!("Test notification posted");
        return Ok(());
    }

    info!("Configuration loaded");
    info!("Messaging app: {}", config.daemon.messaging_app);
    info!("Message store: {}", config.database_path().display());

    let daemon = Daemon::new(config).await.context("Failed to create daemon")?;
    daemon.run().await
}
