//! rfb-viewer entry point.
//!
//! ```text
//! rfb-viewer                          Connect with defaults
//! rfb-viewer --server host:5901       Override the server address
//! rfb-viewer --frames 1 --snapshot out.ppm
//!                                     Save the first frame and exit
//! rfb-viewer --gen-config             Dump default config and exit
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rfb_core::TcpTransport;
use rfb_viewer::app::Viewer;
use rfb_viewer::config::ViewerConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rfb-viewer", about = "Headless VNC viewer")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "rfb-viewer.toml")]
    config: PathBuf,

    /// Server address (overrides config). Example: 192.168.1.100:5900
    #[arg(short, long)]
    server: Option<String>,

    /// Password (overrides config).
    #[arg(short, long)]
    password: Option<String>,

    /// Write the framebuffer to this PPM file on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Disconnect after this many framebuffer updates.
    #[arg(long)]
    frames: Option<u64>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&ViewerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = ViewerConfig::load(&cli.config);
    if let Some(addr) = cli.server {
        config.network.address = addr;
    }
    if let Some(password) = cli.password {
        config.credentials.password = Some(password);
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("rfb-viewer v{}", env!("CARGO_PKG_VERSION"));

    let (transport, mut events) = TcpTransport::new();
    let mut viewer = Viewer::new(Box::new(transport), &config, cli.frames)?;
    viewer.connect(&config.network.address)?;

    let clean = viewer.run(&mut events).await;

    if let Some(path) = &cli.snapshot {
        if let Err(e) = viewer.write_snapshot(path) {
            error!(path = %path.display(), "failed to write snapshot: {e}");
        }
    }

    if !clean {
        return Err("session ended with an error".into());
    }
    info!("shutting down");
    Ok(())
}
