use clap::Parser;
use fanoutd::app_utils::cache_capacity_bytes;
use fanoutd::config::{Config, LoggingConfig};
use fanoutd::network::session_table::SessionTable;
use fanoutd::network::ws_server::WsServer;
use fanoutd::rpc::handler::RpcHandler;
use fanoutd::rpc::server::RpcServer;
use fanoutd::shutdown::ShutdownManager;
use fanoutd::{
    Broadcaster, ConnectionLifecycleHandler, ConnectionStore, EventHandlers,
    InMemoryConnectionStore, SledConnectionStore,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "fanoutd")]
#[command(about = "WebSocket connection registry and broadcast daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "fanoutd.toml")]
    config: String,

    /// Override websocket.listen_address
    #[arg(long)]
    listen_addr: Option<String>,

    #[arg(short, long)]
    verbose: bool,

    /// Write a default config to --config and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        match Config::default().save_to_file(&args.config) {
            Ok(()) => {
                println!("✅ Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("❌ Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(addr) = args.listen_addr {
        config.websocket.listen_address = addr;
    }

    let _log_guard = setup_logging(&config.logging, args.verbose);

    let version = env!("CARGO_PKG_VERSION");
    let git_hash = option_env!("GIT_HASH").unwrap_or("unknown");
    let build_date = option_env!("BUILD_DATE").unwrap_or("unknown");
    tracing::info!(
        version,
        git_hash,
        build_date,
        node = %config.node.name,
        "🚀 fanoutd starting"
    );

    let sled_store = match config.storage.backend.as_str() {
        "memory" => None,
        _ => {
            let path = config.storage.registry_path();
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::error!("Failed to create {}: {}", parent.display(), e);
                    std::process::exit(1);
                }
            }
            match SledConnectionStore::open(
                &path.to_string_lossy(),
                cache_capacity_bytes(config.storage.cache_size_mb),
            ) {
                Ok(store) => Some(Arc::new(
                    store.with_flush_on_write(config.storage.flush_on_write),
                )),
                Err(e) => {
                    // No fallback to memory: a registry that forgets
                    // connections on restart cannot clean them up.
                    tracing::error!("❌ Failed to open connection registry: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let store: Arc<dyn ConnectionStore> = match &sled_store {
        Some(sled) => {
            tracing::info!(
                connections = sled.len(),
                "✓ Using sled connection registry"
            );
            sled.clone()
        }
        None => {
            tracing::info!("✓ Using in-memory connection registry (testing mode)");
            Arc::new(InMemoryConnectionStore::new())
        }
    };

    let sessions = Arc::new(SessionTable::new(config.websocket.outbound_queue_depth));
    let broadcaster = Arc::new(
        Broadcaster::new(store.clone(), sessions.clone()).with_deadline(config.broadcast.deadline()),
    );
    let handlers = Arc::new(EventHandlers::new(
        ConnectionLifecycleHandler::new(store.clone()),
        broadcaster,
    ));

    let mut shutdown_manager = ShutdownManager::new(Duration::from_secs(10));
    let shutdown_token = shutdown_manager.token();

    let ws_server = match WsServer::bind(
        &config.websocket.listen_address,
        handlers.clone(),
        sessions.clone(),
        config.websocket.heartbeat_interval(),
    )
    .await
    {
        Ok(server) => server,
        Err(e) => {
            tracing::error!(
                "❌ Failed to bind WebSocket server on {}: {}",
                config.websocket.listen_address,
                e
            );
            std::process::exit(1);
        }
    };
    let ws_token = shutdown_token.clone();
    shutdown_manager.register_task(
        "websocket",
        tokio::spawn(async move { ws_server.run(ws_token).await }),
    );

    if config.rpc.enabled {
        let rpc_handler = Arc::new(RpcHandler::new(handlers.clone(), store.clone()));
        match RpcServer::bind(&config.rpc.listen_address, rpc_handler).await {
            Ok(server) => {
                let rpc_token = shutdown_token.clone();
                shutdown_manager.register_task(
                    "rpc",
                    tokio::spawn(async move { server.run(rpc_token).await }),
                );
            }
            Err(e) => {
                tracing::error!(
                    "❌ Failed to bind RPC server on {}: {}",
                    config.rpc.listen_address,
                    e
                );
                std::process::exit(1);
            }
        }
    }

    shutdown_manager.wait_for_shutdown().await;

    if let Some(sled) = sled_store {
        if let Err(e) = sled.flush().await {
            tracing::warn!("Failed to flush connection registry: {}", e);
        }
    }
}

fn setup_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.output == "file" {
        let path = std::path::Path::new(&config.file_path);
        let directory = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|f| f.to_os_string())
            .unwrap_or_else(|| "fanoutd.log".into());
        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        if config.format == "json" {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .init();
        } else {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .init();
        }
        return Some(guard);
    }

    // journald adds its own timestamp and hostname
    let is_systemd =
        std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    match config.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_thread_ids(false)
                .init();
        }
        _ if is_systemd => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .without_time()
                .compact()
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_timer(HostTimer {
                    hostname: short_hostname,
                })
                .compact()
                .init();
        }
    }

    None
}

/// UTC timestamp with millisecond precision, tagged with the short hostname
struct HostTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for HostTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(
            w,
            "{}.{:03} [{}]",
            now.format("%Y-%m-%d %H:%M:%S"),
            now.timestamp_subsec_millis(),
            self.hostname
        )
    }
}
