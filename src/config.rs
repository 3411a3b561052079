use std::path::{Path, PathBuf};

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the health backend API
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Directory for the local cache and stored tokens
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<String>,

    /// Mark session cookies as Secure
    #[arg(long, env = "SECURE_COOKIES")]
    pub secure_cookies: Option<bool>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the web front-end (default)
    Serve,
    /// Chat with the assistant from the terminal
    Chat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub cache: CacheConfig,
    pub uploads: UploadConfig,
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Tokens expiring within this window are refreshed early.
    pub refresh_leeway_secs: u64,
    /// Poll interval of the terminal client's token refresher.
    pub refresh_interval_secs: u64,
    pub secure_cookies: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    pub dir: String,
    pub default_ttl_secs: u64,
    /// How often expired entries are swept from both cache levels.
    pub purge_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    pub max_image_bytes: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub request_timeout_secs: u64,
    pub body_limit_bytes: usize,
}

impl AppConfig {
    pub fn load() -> Result<(Self, Command), config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<(Self, Command), config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.exit()
            }
            Err(e) => return Err(config::ConfigError::Message(e.to_string())),
        };
        let command = cli.command.unwrap_or(Command::Serve);

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("backend.base_url", "http://localhost:8000")?
            .set_default("backend.timeout_secs", 120)?
            .set_default("auth.refresh_leeway_secs", 300)?
            .set_default("auth.refresh_interval_secs", 300)?
            .set_default("auth.secure_cookies", false)?
            .set_default("cache.dir", ".health-assistant/cache")?
            .set_default("cache.default_ttl_secs", 300)?
            .set_default("cache.purge_interval_secs", 300)?
            .set_default("uploads.max_image_bytes", 5 * 1024 * 1024)?
            .set_default("resilience.request_timeout_secs", 120)?
            .set_default("resilience.body_limit_bytes", 10 * 1024 * 1024)?;

        // Explicit file first, then ./config.yaml when present.
        if let Some(path) = &cli.config {
            builder = builder.add_source(File::with_name(path));
        } else if Path::new("config.yaml").exists() {
            builder = builder.add_source(File::with_name("config.yaml"));
        }

        // E.g. HAW_SERVER__PORT=8000
        builder = builder.add_source(
            Environment::with_prefix("HAW")
                .separator("__")
                .try_parsing(true),
        );

        // clap already folded PORT/BACKEND_URL/... into the CLI values, so these
        // overrides give CLI flag > CLI env var > HAW_* env > file > defaults.
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(url) = cli.backend_url {
            builder = builder.set_override("backend.base_url", url)?;
        }
        if let Some(dir) = &cli.data_dir {
            let cache_dir = PathBuf::from(dir).join("cache");
            builder = builder.set_override("cache.dir", cache_dir.to_string_lossy().to_string())?;
        }
        if let Some(secure) = cli.secure_cookies {
            builder = builder.set_override("auth.secure_cookies", secure)?;
        }

        let cfg = builder.build()?;
        let config: Self = cfg.try_deserialize()?;
        Ok((config, command))
    }

    /// Directory holding the terminal client's stored tokens.
    ///
    /// This is the parent of the cache directory.
    pub fn data_dir(&self) -> PathBuf {
        Path::new(&self.cache.dir)
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}
