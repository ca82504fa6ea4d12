use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use treeline_accessibility::{
    CaptureFilter, ChromePolicy, EncoderConfig, NullOracle, TreeWalker,
};
use treeline_server::{
    dispatch::Dispatcher,
    driver::{self, DriverConfig},
    server::{self, AppState, Broadcaster, DEFAULT_PORT},
};

#[derive(Parser)]
#[command(name = "treeline")]
#[command(about = "Remote accessibility-tree inspection server")]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Display scale factor used when converting bounds to dp.
    #[arg(long, default_value_t = 1.0)]
    density: f32,

    #[arg(long, default_value_t = 300)]
    scroll_debounce_ms: u64,

    #[arg(long, default_value_t = 2000)]
    text_inactivity_ms: u64,

    #[arg(long, default_value_t = 1000)]
    stability_quiescence_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    // No platform backend is wired in here; embedders construct their own
    // oracle and reuse the library pieces directly.
    let oracle = Arc::new(NullOracle);
    let encoder = EncoderConfig {
        density: cli.density,
    };

    let broadcaster = Broadcaster::new();
    let driver_config = DriverConfig {
        scroll_debounce: Duration::from_millis(cli.scroll_debounce_ms),
        text_inactivity: Duration::from_millis(cli.text_inactivity_ms),
        stability_quiescence: Duration::from_millis(cli.stability_quiescence_ms),
        capture_filter: CaptureFilter {
            important_only: true,
            visible_only: false,
        },
    };
    let handle = driver::spawn(
        oracle.clone(),
        TreeWalker::new(encoder, Box::new(ChromePolicy)),
        broadcaster.clone(),
        driver_config,
    );

    let dispatcher = Dispatcher::new(
        oracle,
        TreeWalker::new(encoder, Box::new(ChromePolicy)),
        handle.control.clone(),
    );
    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        broadcaster,
    };

    info!("starting treeline server");
    server::serve(&cli.host, cli.port, state).await
}
