//! Stream and emulator configuration.

use clap::Parser;

use crate::models::DEFAULT_SESSION_TTL_SECS;

/// Default emulator port.
pub const DEFAULT_PORT: u16 = 10100;

/// Returns the default upload batch width: the available parallelism.
pub fn default_upload_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Tuning for a buffered remote stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Maximum number of range uploads in flight per batch.
    pub upload_concurrency: usize,
    /// Move the cursor to the end of the content before every flush.
    pub seek_to_end_on_flush: bool,
    /// Upper bound on the bytes carried by a single range upload.
    pub max_put_size: Option<u64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            upload_concurrency: default_upload_concurrency(),
            seek_to_end_on_flush: true,
            max_put_size: None,
        }
    }
}

impl StreamConfig {
    /// Sets the batch width. Zero is treated as one.
    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.upload_concurrency = n.max(1);
        self
    }

    pub fn seek_to_end_on_flush(mut self, enabled: bool) -> Self {
        self.seek_to_end_on_flush = enabled;
        self
    }

    /// Caps a single range upload; `None` or zero uploads each range whole.
    pub fn max_put_size(mut self, max: Option<u64>) -> Self {
        self.max_put_size = max.filter(|&m| m > 0);
        self
    }

    /// Batch width actually used by a flush.
    pub fn batch_width(&self) -> usize {
        self.upload_concurrency.max(1)
    }
}

/// Command-line arguments for the emulator.
#[derive(Parser, Debug, Clone)]
#[command(name = "seekstream-rs")]
#[command(about = "Upload-session object store emulator")]
#[command(version)]
pub struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Lifetime of upload sessions, in seconds.
    #[arg(long, default_value_t = DEFAULT_SESSION_TTL_SECS)]
    pub session_ttl_secs: i64,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            debug: false,
            silent: false,
        }
    }
}

/// Emulator configuration derived from command-line arguments.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Lifetime of upload sessions, in seconds.
    pub session_ttl_secs: i64,
    /// Enable debug logging.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            debug: false,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            session_ttl_secs: args.session_ttl_secs,
            debug: args.debug,
        }
    }
}

impl Config {
    /// Returns the bind address for the emulator.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the base URL clients should use.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }
}
