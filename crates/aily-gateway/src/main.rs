use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use aily_bus::{Event, EventBus};
use aily_core::config::AilyConfig;
use aily_core::error::exit;
use aily_core::types::Platform;
use aily_discord::{DiscordAdapter, DiscordSettings};
use aily_host::HostExecutor;
use aily_platform::manager::AdapterManager;
use aily_platform::types::InboundMessage;
use aily_registry::SessionRegistry;
use aily_router::{Router, RouterSettings};
use aily_sched::{Heartbeat, HostPoller, IdleSweeper, OrphanReaper, TranscriptScraper};
use aily_slack::{SlackAdapter, SlackSettings};
use aily_store::bindings::ThreadBindings;
use aily_store::prefs::Preferences;
use aily_store::MessageStore;

mod app;
mod auth;
mod http;
mod rate_limit;
mod ws;

/// Queue between the platform gateways and the router's inbound pump.
const INBOUND_QUEUE_DEPTH: usize = 256;
/// Streaming drain allowance during graceful shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "aily", about = "Bidirectional session relay between tmux fleets and chat platforms", version)]
struct Cli {
    /// Path to the TOML configuration file (default: ~/.aily/aily.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "aily=info,aily_gateway=info,tower_http=debug".into()),
        )
        .init();

    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    // ── configuration ───────────────────────────────────────────────────
    let config = match AilyConfig::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration rejected");
            return exit::CONFIG;
        }
    };
    let hosts = config.hosts();
    if hosts.is_empty() {
        warn!("SSH_HOSTS is empty; no sessions will be observed");
    }

    // ── storage ─────────────────────────────────────────────────────────
    let db_path = config.database.path.clone();
    let (store, writer) = match MessageStore::open(&db_path) {
        Ok(pair) => pair,
        Err(e) => {
            error!(error = %e, path = %db_path, "storage open failed");
            return exit::STORAGE;
        }
    };
    let store = Arc::new(store);

    let open_extra = |label: &str| match aily_store::db::open(&db_path) {
        Ok(conn) => Some(conn),
        Err(e) => {
            error!(error = %e, label, "storage open failed");
            None
        }
    };
    let Some(bindings_conn) = open_extra("bindings") else {
        return exit::STORAGE;
    };
    let Some(prefs_conn) = open_extra("preferences") else {
        return exit::STORAGE;
    };
    let Some(registry_conn) = open_extra("registry") else {
        return exit::STORAGE;
    };

    let bus = Arc::new(EventBus::new());
    let bindings = Arc::new(ThreadBindings::new(bindings_conn));
    let prefs = Preferences::new(prefs_conn);
    let registry = match SessionRegistry::load(registry_conn, Arc::clone(&bus)) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            error!(error = %e, "session registry load failed");
            return exit::STORAGE;
        }
    };

    // ── host fleet ──────────────────────────────────────────────────────
    let socket_dir = format!(
        "{}/.aily/sockets",
        std::env::var("HOME").unwrap_or_else(|_| ".".into())
    );
    let executor = Arc::new(HostExecutor::new(&hosts, &socket_dir));

    // ── platform adapters ───────────────────────────────────────────────
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE_DEPTH);

    let mut adapters = AdapterManager::new();
    for platform in config.enabled_platforms() {
        match platform {
            Platform::Discord => {
                let settings = DiscordSettings {
                    bot_token: config.discord_bot_token.clone().unwrap_or_default(),
                    channel_id: config
                        .discord_channel_id
                        .as_deref()
                        .and_then(|c| c.parse().ok())
                        .unwrap_or_default(),
                };
                adapters.register(Box::new(DiscordAdapter::new(settings, inbound_tx.clone())));
            }
            Platform::Slack => {
                let settings = SlackSettings {
                    bot_token: config.slack_bot_token.clone().unwrap_or_default(),
                    app_token: config.slack_app_token.clone().unwrap_or_default(),
                    channel_id: config.slack_channel_id.clone().unwrap_or_default(),
                };
                adapters.register(Box::new(SlackAdapter::new(settings, inbound_tx.clone())));
            }
        }
    }

    if let Err(e) = adapters.connect_all().await {
        error!(error = %e, "platform authentication failed");
        return exit::PLATFORM_AUTH;
    }
    let adapters = Arc::new(adapters);
    for platform in adapters.platforms() {
        bus.publish(Event::ConnectionStatus {
            platform,
            connected: true,
        });
    }

    // ── router and schedulers ───────────────────────────────────────────
    let router = Arc::new(Router::new(
        Arc::clone(&registry),
        Arc::clone(&store),
        Arc::clone(&bindings),
        Arc::clone(&bus),
        Arc::clone(&executor),
        Arc::clone(&adapters),
        RouterSettings {
            hosts: hosts.clone(),
            notify_max_retries: config.notify_max_retries,
            thread_cleanup: config.thread_cleanup,
            thread_sync: config.tmux_thread_sync,
        },
    ));

    let shutdown = CancellationToken::new();
    tokio::spawn(writer.run(shutdown.clone()));
    tokio::spawn(Arc::clone(&router).run_inbound(inbound_rx));
    router.start_outboxes(shutdown.clone());

    let scraper = Arc::new(TranscriptScraper::new(
        Arc::clone(&executor),
        Arc::clone(&registry),
        Arc::clone(&router),
        Arc::clone(&bus),
        config.scrape_interval_ms,
    ));

    tokio::spawn(
        HostPoller::new(
            Arc::clone(&executor),
            Arc::clone(&registry),
            Arc::clone(&bus),
            config.poll_interval_ms,
        )
        .run(shutdown.clone()),
    );
    tokio::spawn(Arc::clone(&scraper).run(shutdown.clone()));
    tokio::spawn(
        IdleSweeper::new(Arc::clone(&registry), config.idle_after_sec).run(shutdown.clone()),
    );
    tokio::spawn(
        OrphanReaper::new(
            Arc::clone(&registry),
            Arc::clone(&router),
            config.orphan_retain_hours,
        )
        .run(shutdown.clone()),
    );
    tokio::spawn(Heartbeat::new(Arc::clone(&bus), Arc::clone(&adapters)).run(shutdown.clone()));
    tokio::spawn(backup_task(
        db_path.clone(),
        config.backup.dir.clone(),
        config.backup.interval_hours,
        config.backup.retain_days,
        shutdown.clone(),
    ));

    // ── http/ws surface ─────────────────────────────────────────────────
    let state = Arc::new(app::AppState {
        config: config.clone(),
        bus: Arc::clone(&bus),
        registry: Arc::clone(&registry),
        store: Arc::clone(&store),
        bindings: Arc::clone(&bindings),
        prefs,
        executor: Arc::clone(&executor),
        adapters: Arc::clone(&adapters),
        router: Arc::clone(&router),
        scraper: Arc::clone(&scraper),
        rate_limiter: rate_limit::RateLimiter::new(),
        stream_clients: AtomicUsize::new(0),
        event_seq: AtomicU64::new(0),
        started_at: chrono::Utc::now(),
    });
    let router_http = app::build_router(Arc::clone(&state));

    let addr: SocketAddr = match format!("{}:{}", config.gateway.bind, config.gateway.port).parse()
    {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "bad gateway bind address");
            return exit::CONFIG;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, %addr, "gateway bind failed");
            return exit::CONFIG;
        }
    };
    info!(%addr, "aily gateway listening");

    let serve_shutdown = shutdown.clone();
    let server = axum::serve(
        listener,
        router_http.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { serve_shutdown.cancelled().await });

    // a signal cancels the token; the server then stops accepting and
    // finishes in-flight requests
    let signalled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let signalled = Arc::clone(&signalled);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            signalled.store(true, Ordering::Release);
            shutdown.cancel();
        });
    }

    if let Err(e) = server.await {
        error!(error = %e, "server error");
    }
    let signalled = signalled.load(Ordering::Acquire);

    // ── graceful teardown, reverse of construction ──────────────────────
    info!("shutting down");
    shutdown.cancel();
    drain_stream_clients(&state).await;
    adapters.disconnect_all().await;
    for platform in adapters.platforms() {
        bus.publish(Event::ConnectionStatus {
            platform,
            connected: false,
        });
    }
    // writer flush and scheduler exits ride on the cancelled token; give
    // them a moment before the executor's channels drop
    tokio::time::sleep(Duration::from_millis(200)).await;
    drop(executor);

    if signalled {
        exit::SIGNAL
    } else {
        exit::CLEAN
    }
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("SIGINT received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("interrupt received");
    }
}

/// Bounded wait for streaming clients to drain after the token fires.
async fn drain_stream_clients(state: &Arc<app::AppState>) {
    let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
    while state.stream_clients.load(Ordering::Acquire) > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(
                remaining = state.stream_clients.load(Ordering::Acquire),
                "streaming clients abandoned at drain deadline"
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Periodic compressed snapshot of the database plus retention sweep.
async fn backup_task(
    db_path: String,
    backup_dir: String,
    interval_hours: u64,
    retain_days: u64,
    shutdown: CancellationToken,
) {
    let dir = std::path::PathBuf::from(backup_dir);
    if !aily_store::backup::check_dir(&dir) {
        warn!(dir = %dir.display(), "backup directory unusable, backups disabled");
        return;
    }

    let mut interval = tokio::time::interval(Duration::from_secs(interval_hours * 3600));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // skip the immediate tick

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let db = db_path.clone();
                let dir = dir.clone();
                let result = tokio::task::spawn_blocking(move || {
                    aily_store::backup::snapshot(&db, &dir)
                        .and_then(|_| aily_store::backup::sweep(&dir, retain_days))
                })
                .await;
                match result {
                    Ok(Ok(removed)) => {
                        if removed > 0 {
                            info!(removed, "old snapshots swept");
                        }
                    }
                    Ok(Err(e)) => warn!(error = %e, "backup failed"),
                    Err(e) => warn!(error = %e, "backup task panicked"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
