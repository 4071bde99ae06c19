use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Pretty,
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. `RUST_LOG` overrides `default_directive`.
pub fn init_with(format: Format, default_directive: &str) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter(default_directive))
        .with_timer(SystemTime)
        .with_target(false);

    let result = match format {
        Format::Json => builder.json().try_init(),
        Format::Pretty => builder.pretty().try_init(),
    };
    if result.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}

pub(crate) fn init_test_writer(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_directive))
        .with_test_writer()
        .compact()
        .try_init();
}
