use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// Initializes the global `tracing` subscriber.
///
/// Logs as structured JSON by default; `pretty` switches to a human-readable console
/// formatter. The filter level comes from `RUST_LOG` if set, otherwise `info`, or `trace`
/// when `verbose` is requested and `RUST_LOG` is unset.
pub fn init_tracing(pretty: bool, verbose: bool) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "trace" } else { "info" })
    });
    tracing_log::LogTracer::init()?;

    if pretty {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        let subscriber = Registry::default().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}
