use std::io::IsTerminal;

use sentry::integrations::tracing as sentry_tracing;
use tracing::Level;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use crate::config::{Config, LogFormat};

/// Initializes Sentry if a DSN is configured.
///
/// The returned guard flushes pending events when dropped and must be held until shutdown.
pub fn init_sentry(config: &Config) -> Option<sentry::ClientInitGuard> {
    let sentry_config = &config.sentry;
    let dsn = sentry_config.dsn.as_deref()?;

    Some(sentry::init(sentry::ClientOptions {
        dsn: dsn.parse().ok(),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        environment: sentry_config.environment.clone().map(Into::into),
        sample_rate: sentry_config.sample_rate,
        ..Default::default()
    }))
}

/// Installs the global tracing subscriber.
///
/// Logs go to stderr in the configured format. Warnings and errors are additionally reported to
/// Sentry if it is enabled.
pub fn init_tracing(config: &Config) {
    let sentry_layer = config.sentry.is_enabled().then(|| {
        sentry_tracing::layer().event_filter(|metadata| match *metadata.level() {
            Level::ERROR | Level::WARN => sentry_tracing::EventFilter::Event,
            Level::INFO => sentry_tracing::EventFilter::Breadcrumb,
            Level::DEBUG | Level::TRACE => sentry_tracing::EventFilter::Ignore,
        })
    });

    let format = match config.logging.format {
        LogFormat::Auto if std::io::stderr().is_terminal() => LogFormat::Pretty,
        LogFormat::Auto => LogFormat::Simplified,
        format => format,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let fmt_layer = match format {
        LogFormat::Pretty => fmt_layer.pretty().boxed(),
        LogFormat::Json => fmt_layer.json().flatten_event(true).boxed(),
        LogFormat::Simplified | LogFormat::Auto => fmt_layer.with_ansi(false).boxed(),
    };

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let (level, env_filter) = parse_rust_log(config.logging.level, rust_log.as_deref());

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(level))
        .with(sentry_layer)
        .with(env_filter)
        .init();
}

/// Resolves the output level and the directives that select which targets may log.
///
/// A plain level in `RUST_LOG` replaces the configured level and keeps the default directives.
/// Anything else in `RUST_LOG` is taken literally as directives and all their output is shown.
fn parse_rust_log(configured: LevelFilter, rust_log: Option<&str>) -> (LevelFilter, EnvFilter) {
    let level = match rust_log.map(str::trim) {
        None | Some("") => configured,
        Some(value) => match value.parse::<LevelFilter>() {
            Ok(level) => level,
            Err(_) => return (LevelFilter::TRACE, EnvFilter::new(value)),
        },
    };

    // This is the maximum verbosity that will be logged, we filter this down to `level`.
    let env_filter = EnvFilter::new(
        "INFO,\
        etcdstress=TRACE,\
        etcdstress_filler=TRACE,\
        ",
    );

    (level, env_filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_without_rust_log() {
        let (level, _) = parse_rust_log(LevelFilter::WARN, None);
        assert_eq!(level, LevelFilter::WARN);

        let (level, _) = parse_rust_log(LevelFilter::WARN, Some(""));
        assert_eq!(level, LevelFilter::WARN);
    }

    #[test]
    fn plain_rust_log_level_widens_output() {
        let (level, _) = parse_rust_log(LevelFilter::INFO, Some("trace"));
        assert_eq!(level, LevelFilter::TRACE);

        let (level, _) = parse_rust_log(LevelFilter::DEBUG, Some("ERROR"));
        assert_eq!(level, LevelFilter::ERROR);
    }

    #[test]
    fn rust_log_directives_show_everything_they_select() {
        let (level, filter) =
            parse_rust_log(LevelFilter::INFO, Some("warn,etcdstress::etcd=trace"));
        assert_eq!(level, LevelFilter::TRACE);
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }
}
