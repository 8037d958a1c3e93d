//! Janus server entry point.
//!
//! Loads configuration from an optional file, `.env` and `JANUS__*`
//! environment variables, then serves the widgets service until SIGTERM or
//! Ctrl-C.

mod settings;
mod widgets;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use janus_config::ConfigLoader;
use janus_server::Server;
use tracing::info;

/// Environment variable naming the configuration file.
const CONFIG_ENV: &str = "JANUS_CONFIG";

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = std::env::var_os(CONFIG_ENV).map(PathBuf::from);

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("janus {}", env!("CARGO_PKG_VERSION"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r"Janus - widgets over gRPC and JSON/HTTP

USAGE:
    janus [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    JANUS_CONFIG                     Configuration file, if --config is absent
    JANUS__SERVER__HTTP_ADDR         HTTP listen address (default: 0.0.0.0:8080)
    JANUS__SERVER__RPC_ADDR          RPC listen address (default: 0.0.0.0:8081)
    JANUS__HEALTH__KIND              simple | draining (default: draining)
    JANUS__HEALTH__PATH              Health check path (default: /status.txt)
    JANUS__TELEMETRY__LOGGING__LEVEL Log level filter (default: info)
"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new().with_dotenv();
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("loading {}", path.display()))?;
    }
    let config = loader
        .with_env_prefix("JANUS")
        .load()
        .context("invalid configuration")?;

    janus_telemetry::init_telemetry(&config.telemetry_config())
        .context("initializing telemetry")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        http_addr = %config.server.http_addr,
        rpc_addr = %config.server.rpc_addr,
        "starting janus"
    );

    let mut server = Server::new(settings::server_config(&config));
    server
        .register(widgets::service(Arc::new(widgets::WidgetStore::default())))
        .context("registering widgets service")?;
    server.run().await.context("server failed")?;

    info!("janus exited cleanly");
    Ok(())
}
