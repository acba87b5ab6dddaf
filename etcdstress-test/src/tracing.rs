use tracing_subscriber::EnvFilter;

const CRATE_NAMES: &[&str] = &["etcdstress", "etcdstress_filler"];

/// Initialize the logger for testing.
///
/// This logs to the stdout registered by the Rust test runner. By default it captures every event
/// of the binary and the population engine, and only errors from dependencies such as `reqwest`
/// or `axum`. Setting `RUST_LOG` replaces these defaults, for example to trace the HTTP stack while
/// debugging the fake etcd server.
///
/// # Example
///
/// ```
/// etcdstress_test::tracing::init();
/// ```
pub fn init() {
    tracing_subscriber::fmt::fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_test_writer()
        .compact()
        .try_init()
        .ok();
}

fn env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    CRATE_NAMES
        .iter()
        .fold(EnvFilter::new("ERROR"), |filter, name| {
            filter.add_directive(format!("{name}=TRACE").parse().unwrap())
        })
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn defaults_trace_own_crates() {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return;
        }

        assert_eq!(env_filter().max_level_hint(), Some(LevelFilter::TRACE));
    }
}
