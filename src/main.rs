//! Health Assistant web front-end
//!
//! Entry point: serves the web UI, or runs the terminal chat client.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::map_err_ignore)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::unused_async)]

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use health_assistant_web::config::{AppConfig, Command};
use health_assistant_web::{server, terminal};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Initialize tracing (M-LOG-STRUCTURED).
///
/// `RUST_LOG` overrides `default_level`; `LOG_FORMAT=json` switches to JSON
/// lines. Logs go to stderr so the terminal client's stdout stays clean.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let (config, command) = AppConfig::load()?;
    let config = Arc::new(config);

    match command {
        Command::Serve => {
            init_tracing("info");
            server::start_server(config).await
        }
        Command::Chat => {
            init_tracing("warn");
            terminal::run(config).await
        }
    }
}
