//! Tracing setup for the relay daemon.
//!
//! The subscriber is installed before the config file is read so that config
//! problems are reported. The configured `log_level` is applied afterwards
//! through a reload handle.

use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Level used until the config file has been read.
pub const DEFAULT_LEVEL: &str = "info";

/// Changes the active filter after startup.
pub struct LogFilter {
    handle: reload::Handle<EnvFilter, Registry>,
}

impl LogFilter {
    /// Switch to `level`. `RUST_LOG` still takes precedence.
    pub fn apply_level(&self, level: &str) -> Result<(), reload::Error> {
        self.handle.reload(env_filter(level))
    }
}

/// `RUST_LOG` when set, otherwise `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Build a subscriber writing to `writer` with a reloadable filter.
pub fn subscriber<W>(
    default_level: &str,
    writer: W,
) -> (impl tracing::Subscriber + Send + Sync + 'static, LogFilter)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(env_filter(default_level));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, LogFilter { handle })
}

/// Install the global stderr subscriber. Call before anything logs.
pub fn init_tracing() -> LogFilter {
    let (subscriber, filter) = subscriber(DEFAULT_LEVEL, std::io::stderr);
    subscriber.init();
    filter
}
