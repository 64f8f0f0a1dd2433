use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use staticache::logging::{init_logging, LogFormat};
use staticache::server::{serve, shutdown_signal};
use staticache::{Codec, HiddenFiles, ServeMode, ServingConfig, StaticEngine};

#[derive(Debug, Parser)]
#[command(name = "staticache", version, about = "Cached static file server")]
struct Args {
    /// Directory to serve.
    #[arg(default_value = ".")]
    root: PathBuf,

    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// URL prefix the files are served under.
    #[arg(long, default_value = "")]
    prefix: String,

    /// Serve the index document for unknown paths.
    #[arg(long)]
    spa: bool,

    #[arg(long, default_value = "index.html")]
    index: String,

    #[arg(long)]
    custom_404: Option<String>,

    #[arg(long, default_value_t = 100)]
    cache_mb: u64,

    #[arg(long, default_value_t = 500)]
    cache_files: usize,

    #[arg(long)]
    no_cache: bool,

    #[arg(long)]
    no_compression: bool,

    /// Codecs in server preference order, e.g. `zstd,gzip`.
    #[arg(long, value_delimiter = ',', default_value = "zstd,gzip")]
    codecs: Vec<String>,

    #[arg(long, default_value_t = 1)]
    compression_level: i32,

    #[arg(long, default_value = "public, max-age=60")]
    cache_control: String,

    #[arg(long)]
    no_etag: bool,

    #[arg(long)]
    allow_hidden: bool,

    /// Only answer requests for static asset extensions.
    #[arg(long)]
    middleware: bool,

    #[arg(long)]
    preload: bool,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn codecs(&self) -> Result<Vec<Codec>> {
        self.codecs
            .iter()
            .map(|token| {
                Codec::from_token(token).with_context(|| format!("unknown codec: {token}"))
            })
            .collect()
    }

    fn into_config(self) -> Result<ServingConfig> {
        if !self.root.is_dir() {
            bail!("{} is not a directory", self.root.display());
        }
        let codecs = self.codecs()?;

        let mut config = ServingConfig::directory(&self.root)
            .with_prefix(&self.prefix)
            .with_index_file(Some(self.index.as_str()))
            .with_spa_fallback(self.spa)
            .with_cache(!self.no_cache)
            .with_cache_limits(self.cache_mb * 1024 * 1024, self.cache_files)
            .with_compression(!self.no_compression)
            .with_codecs(&codecs)
            .with_compression_level(self.compression_level)
            .with_cache_control(Some(self.cache_control.as_str()))
            .with_etag(!self.no_etag)
            .with_preload(self.preload)
            .with_eviction_callback(|path| tracing::debug!(path, "evicted from cache"));

        if self.allow_hidden {
            config = config.with_hidden_files(HiddenFiles::Allow);
        }
        if self.middleware {
            config = config.with_mode(ServeMode::middleware());
        }
        if let Some(page) = &self.custom_404 {
            config = config.with_custom_404(page);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_format)?;

    let addr = format!("{}:{}", args.host, args.port);
    let root = args.root.display().to_string();
    let config = args.into_config()?;

    let engine = tokio::task::spawn_blocking(move || StaticEngine::new(config))
        .await
        .context("engine initialisation panicked")?;

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, %root, "staticache running");

    serve(listener, Arc::new(engine), shutdown_signal()).await?;

    info!("server shutdown complete");
    Ok(())
}
