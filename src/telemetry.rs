use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

/// Build a JSON-formatting subscriber writing to `sink`.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn get_subscriber<Sink>(default_filter: &str, sink: Sink) -> impl Subscriber + Send + Sync
where
    Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let formatting_layer = tracing_subscriber::fmt::layer()
        .with_writer(sink)
        .with_target(true)
        .json();

    Registry::default().with(env_filter).with(formatting_layer)
}

/// Install `subscriber` as the process-wide default. Can only succeed once.
pub fn init_subscriber(
    subscriber: impl Subscriber + Send + Sync,
) -> Result<(), SetGlobalDefaultError> {
    tracing::subscriber::set_global_default(subscriber)
}

/// Structured JSON logging to stdout, level from `RUST_LOG` (default `info`).
pub fn init_telemetry() -> Result<(), SetGlobalDefaultError> {
    init_subscriber(get_subscriber("info", std::io::stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_can_be_built_for_a_sink() {
        let subscriber = get_subscriber("debug", std::io::sink);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(user_id = "u-1", "log line routed to sink");
        });
    }
}
