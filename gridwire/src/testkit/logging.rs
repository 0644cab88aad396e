use tracing_subscriber::EnvFilter;

/// The filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "gridwire=warn,gridwire::cluster=info";

/// Installs a formatting subscriber for tests and binaries. Later calls do nothing.
pub fn init_logging() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
  let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}
