use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub public_url: Option<String>,
    pub signing_key: Option<String>,
    pub signing_expires_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Object storage serving proxy with on-demand image variants")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides MEDIA_STORE_DATA_DIR)
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Public base URL for generated links (overrides MEDIA_STORE_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// HMAC key for signed serving URLs; unset disables signing
    /// (overrides MEDIA_STORE_SIGNING_KEY)
    #[arg(long)]
    pub signing_key: Option<String>,

    /// Default ttl in seconds for signed URLs; 0 means no expiry
    /// (overrides MEDIA_STORE_SIGNING_EXPIRES)
    #[arg(long)]
    pub signing_expires: Option<u64>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MEDIA_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("MEDIA_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MEDIA_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading MEDIA_STORE_PORT"),
        };
        let env_data_dir =
            env::var("MEDIA_STORE_DATA_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_public_url = env::var("MEDIA_STORE_PUBLIC_URL").ok();
        let env_signing_key = env::var("MEDIA_STORE_SIGNING_KEY").ok();
        let env_signing_expires = match env::var("MEDIA_STORE_SIGNING_EXPIRES") {
            Ok(value) => Some(value.parse::<u64>().with_context(|| {
                format!("parsing MEDIA_STORE_SIGNING_EXPIRES value `{}`", value)
            })?),
            Err(_) => None,
        };

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            data_dir: args.data_dir.unwrap_or(env_data_dir),
            public_url: args.public_url.or(env_public_url),
            signing_key: args.signing_key.or(env_signing_key),
            signing_expires_secs: args.signing_expires.or(env_signing_expires).unwrap_or(0),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL advertised in generated links. Falls back to the bind
    /// address, substituting loopback for the wildcard hosts.
    pub fn public_url(&self) -> String {
        if let Some(url) = &self.public_url {
            return url.trim_end_matches('/').to_string();
        }
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }
}
