use std::path::PathBuf;

use anyhow::Result;
use argh::FromArgs;
use etcdstress_filler::record::normalize_prefix;

use crate::config::Config;
use crate::etcd::EtcdClient;
use crate::{observability, populate, purge};

/// Populates an etcd cluster with generated records.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Populate(PopulateCommand),
    Purge(PurgeCommand),
    Version(VersionCommand),
}

/// purge the key prefix and write new records below it
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "populate")]
struct PopulateCommand {
    /// number of records to write
    #[argh(option, short = 'n')]
    count: Option<usize>,

    /// number of concurrent writers
    #[argh(option, short = 'w')]
    workers: Option<usize>,

    /// keep existing data under the key prefix
    #[argh(switch)]
    no_purge: bool,
}

/// delete all data under the key prefix
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "purge")]
struct PurgeCommand {}

/// print the etcdstress version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

impl PopulateCommand {
    fn apply(&self, config: &mut Config) {
        if let Some(count) = self.count {
            config.populate.count = count;
        }
        if let Some(workers) = self.workers {
            config.populate.workers = workers;
        }
        if self.no_purge {
            config.populate.purge = false;
        }
    }
}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("etcdstress {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let mut config = Config::load(args.config.as_deref())?;
    if let Command::Populate(command) = &args.command {
        command.apply(&mut config);
    }
    let etcd = config.etcd.validate()?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    let client = EtcdClient::new(&etcd)?;

    runtime.block_on(async move {
        match args.command {
            Command::Populate(_) => populate::populate(client, &config.populate)
                .await
                .map(drop),
            Command::Purge(PurgeCommand {}) => {
                let prefix = normalize_prefix(&config.populate.prefix);
                purge::purge(&client, &prefix).await
            }
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["etcdstress"], args).unwrap()
    }

    #[test]
    fn populate_flags_override_config() {
        let args = parse(&["populate", "-n", "500", "--workers", "4", "--no-purge"]);
        let Command::Populate(command) = args.command else {
            panic!("expected populate command");
        };

        let mut config = Config::default();
        command.apply(&mut config);

        assert_eq!(config.populate.count, 500);
        assert_eq!(config.populate.workers, 4);
        assert!(!config.populate.purge);
    }

    #[test]
    fn populate_keeps_config_without_flags() {
        let args = parse(&["-c", "etcdstress.yml", "populate"]);
        assert_eq!(args.config.as_deref(), Some(std::path::Path::new("etcdstress.yml")));
        let Command::Populate(command) = args.command else {
            panic!("expected populate command");
        };

        let mut config = Config::default();
        config.populate.count = 42;
        command.apply(&mut config);

        assert_eq!(config.populate.count, 42);
        assert_eq!(config.populate.workers, 2);
        assert!(config.populate.purge);
    }

    #[test]
    fn parses_purge() {
        assert!(matches!(parse(&["purge"]).command, Command::Purge(_)));
    }
}
