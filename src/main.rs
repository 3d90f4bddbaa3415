use std::sync::Arc;
use tokio::sync::broadcast;

use orderflow_engine::config::EngineConfig;
use orderflow_engine::exchange::{DepthStreamClient, TradeStreamClient};
use orderflow_engine::metrics::PipelineMetrics;
use orderflow_engine::pipeline::{Engine, IngressQueue};
use orderflow_engine::server::{AppState, Payload};
use orderflow_engine::storage::FlowStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args);

    // Class-4 errors refuse startup here.
    let mut config = match &options.config_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            EngineConfig::from_toml(&text)?
        }
        None => EngineConfig::default(),
    };
    if let Some(port) = options.port {
        config.server.port = port;
    }
    if let Some(symbol) = options.symbol {
        config.global.symbol = symbol.to_uppercase();
        config.validate()?;
    }

    tracing::info!(
        symbol = %config.global.symbol,
        tick_size = %config.global.tick_size,
        "Starting orderflow engine"
    );

    let metrics = Arc::new(PipelineMetrics::new());
    let queue = Arc::new(IngressQueue::new(
        config.pipeline.queue_capacity,
        Arc::clone(&metrics),
    ));
    let (bus, _) = broadcast::channel::<Payload>(config.server.broadcast_capacity);

    let engine = Engine::new(&config, Arc::clone(&metrics))?;
    let degraded = engine.degraded_flag();

    // Optional persistence on its own task.
    let storage_tx = if config.storage.enabled {
        let storage = FlowStorage::open(&config.storage.path, &config.global.symbol)?;
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let batch_size = config.storage.trade_batch_size;
        let retention_ms = config.storage.retention_ms;
        tokio::spawn(orderflow_engine::storage::run_storage(
            storage, rx, batch_size, retention_ms,
        ));
        Some(tx)
    } else {
        None
    };

    // Exchange adapter tasks own the connections.
    let trade_stream = TradeStreamClient::new(
        &config.global.symbol,
        Arc::clone(&queue),
        Arc::clone(&metrics),
    );
    tokio::spawn(trade_stream.run());
    let depth_stream = DepthStreamClient::new(
        &config.global.symbol,
        config.orderbook.max_levels,
        Arc::clone(&queue),
        Arc::clone(&metrics),
    );
    tokio::spawn(depth_stream.run());

    // Dashboard egress.
    let state = AppState {
        bus: bus.clone(),
        engine_config: Arc::new(config.clone()),
        server_config: config.server.clone(),
        metrics: Arc::clone(&metrics),
    };
    tokio::spawn(async move {
        if let Err(error) = orderflow_engine::server::serve(state).await {
            tracing::error!(error = %error, "Dashboard server exited");
        }
    });

    // The processing pipeline runs until shutdown.
    let pipeline = tokio::spawn(orderflow_engine::pipeline::run(
        engine, queue, bus, config, degraded, storage_tx,
    ));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
        result = pipeline => {
            tracing::error!(result = ?result, "Pipeline task ended unexpectedly");
        }
    }

    Ok(())
}

#[derive(Default)]
struct Options {
    config_path: Option<String>,
    port: Option<u16>,
    symbol: Option<String>,
}

/// Parse command-line arguments
fn parse_args(args: &[String]) -> Options {
    let mut options = Options::default();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if i + 1 < args.len() {
                    options.config_path = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    options.port = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--symbol" => {
                if i + 1 < args.len() {
                    options.symbol = Some(args[i + 1].clone());
                    i += 1;
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    options
}

/// Print usage information
fn print_usage() {
    println!("orderflow-engine - real-time orderflow analysis for one trading pair");
    println!();
    println!("USAGE:");
    println!("    orderflow-engine [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>     TOML configuration file (defaults apply when omitted)");
    println!("    --symbol <SYMBOL>   Trading pair override, e.g. BTCUSDT");
    println!("    --port <PORT>       Dashboard WebSocket port (default: 8720)");
    println!("    --help, -h          Print this help message");
    println!();
    println!("ENVIRONMENT VARIABLES:");
    println!("    RUST_LOG            Logging filter (default: info)");
}
