//! pulse-agent: headless presence agent.
//!
//! Loads configuration, runs the synchronization engine, and logs
//! roster/status activity. A few stdin commands are available for
//! development: `status <available|busy|focused>`, `who`, `quit`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pulse_config::schema::PulseConfig;
use pulse_presence::{
    HttpStatusStore, Identity, PresenceTuning, RetryPolicy, Status, StatusStore, SyncConfig,
    SyncEngine, SyncEvent, SyncHandle, TransportConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "pulse-agent", about = "Headless presence agent for pulse")]
struct Args {
    /// Path to a config file (defaults to the platform config dir).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display name override.
    #[arg(long)]
    name: Option<String>,

    /// Initial status (available, busy, focused).
    #[arg(long)]
    status: Option<Status>,

    /// Relay endpoint override.
    #[arg(long)]
    endpoint: Option<String>,

    /// Log filter override, e.g. "debug" or "pulse_presence=trace".
    #[arg(long)]
    log_level: Option<String>,
}

fn load_config(args: &Args) -> PulseConfig {
    let result = match &args.config {
        Some(path) => pulse_config::load_from_path(path),
        None => pulse_config::load_config(),
    };
    match result {
        Ok(config) => config,
        Err(e) => {
            warn!("failed to load config ({e}), using defaults");
            PulseConfig::default()
        }
    }
}

fn sync_config(config: &PulseConfig, args: &Args) -> SyncConfig {
    SyncConfig {
        transport: TransportConfig {
            endpoint: args
                .endpoint
                .clone()
                .unwrap_or_else(|| config.transport.endpoint.clone()),
            api_key: config.transport.api_key.clone(),
            user_id: String::new(), // filled in by the engine
            heartbeat_interval: Duration::from_secs(config.transport.heartbeat_interval),
            connect_timeout: Duration::from_secs(config.transport.connect_timeout),
        },
        retry: RetryPolicy {
            delay: Duration::from_secs(config.reconnect.retry_delay),
            max_retries: config.reconnect.max_retries,
        },
        tuning: PresenceTuning {
            enter_timeout: Duration::from_secs(config.presence.enter_timeout),
            enter_retries: config.presence.enter_retries,
            enter_retry_delay: Duration::from_secs(config.presence.enter_retry_delay),
            refresh_delay: Duration::from_millis(config.presence.refresh_delay_ms),
            refresh_interval: Duration::from_secs(config.presence.refresh_interval),
            leave_grace: Duration::from_millis(config.presence.leave_grace_ms),
        },
        persist_debounce: Duration::from_millis(config.persistence.debounce_ms),
    }
}

fn build_identity(config: &PulseConfig, args: &Args) -> Identity {
    let user_id = if config.identity.user_id.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        config.identity.user_id.clone()
    };
    Identity {
        user_id,
        name: args
            .name
            .clone()
            .unwrap_or_else(|| config.identity.name.clone()),
        contact: (!config.identity.contact.is_empty()).then(|| config.identity.contact.clone()),
        avatar_ref: (!config.identity.avatar_ref.is_empty())
            .then(|| config.identity.avatar_ref.clone()),
    }
}

fn build_store(config: &PulseConfig) -> Option<Arc<dyn StatusStore>> {
    if config.persistence.base_url.is_empty() {
        return None;
    }
    let token = (!config.persistence.access_token.is_empty())
        .then(|| config.persistence.access_token.clone());
    match HttpStatusStore::new(
        config.persistence.base_url.clone(),
        token,
        Duration::from_secs(config.persistence.request_timeout),
    ) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("durable persistence disabled: {e}");
            None
        }
    }
}

fn log_event(event: &SyncEvent) {
    match event {
        SyncEvent::Connected { online_count } => {
            info!(online = online_count, "connected to presence roster");
        }
        SyncEvent::Disconnected => info!("disconnected from presence roster"),
        SyncEvent::UserOnline(user) => {
            info!(user = %user.name, status = %user.status, "user online");
        }
        SyncEvent::UserOffline { name, .. } => info!(user = %name, "user offline"),
        SyncEvent::StatusChanged(user) => {
            info!(user = %user.name, status = %user.status, "status changed");
        }
        SyncEvent::ReconnectScheduled { attempt, max } => {
            warn!(attempt, max, "reconnect scheduled");
        }
        SyncEvent::RetriesExhausted => {
            warn!("automatic reconnects exhausted; type 'reconnect' to retry");
        }
        SyncEvent::Fatal(error) => {
            error!(error = %error, "fatal transport failure; check endpoint and api key");
        }
    }
}

async fn handle_line(line: &str, handle: &SyncHandle) -> bool {
    let mut parts = line.split_whitespace();
    match parts.next() {
        Some("status") => match parts.next().map(str::parse::<Status>) {
            Some(Ok(status)) => {
                if handle.set_status(status).await.is_err() {
                    return false;
                }
                info!(status = %status, "status set");
            }
            _ => println!("usage: status <available|busy|focused>"),
        },
        Some("who") => {
            for user in handle.snapshot().await {
                println!("  {}  [{}]", user.name, user.status);
            }
        }
        Some("reconnect") => {
            let _ = handle.reconnect().await;
        }
        Some("quit") | Some("exit") => return false,
        Some(other) => println!("unknown command: {other}"),
        None => {}
    }
    true
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = load_config(&args);

    let default_filter = format!(
        "pulse_agent={level},pulse_presence={level}",
        level = config.logging.level.as_filter()
    );
    let filter = args.log_level.clone().unwrap_or(default_filter);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .init();

    let identity = build_identity(&config, &args);
    let store = build_store(&config);
    info!(user = %identity.user_id, name = %identity.name, "starting pulse agent");

    let (handle, mut events) = SyncEngine::start(identity, sync_config(&config, &args), store);

    if let Some(status) = args.status {
        if let Err(e) = handle.set_status(status).await {
            error!(error = %e, "failed to set initial status");
        }
    }

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => log_event(&event),
                None => break,
            },
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(line.trim(), &handle).await {
                        break;
                    }
                }
                Ok(None) => break, // stdin closed
                Err(e) => {
                    warn!(error = %e, "stdin error");
                    break;
                }
            }
        }
    }

    info!("shutting down");
    handle.shutdown().await;
}
