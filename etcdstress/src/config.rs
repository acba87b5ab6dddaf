//! Configuration for etcdstress.
//!
//! Configuration can be loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags of the `populate` command
//! 2. Environment variables (prefixed with `ES__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `ES__` as a prefix and double underscores (`__`) to denote nested
//! configuration structures. For example:
//!
//! - `ES__ETCD__CLUSTER_URLS=https://10.0.0.1:4001,https://10.0.0.2:4001` sets the cluster
//! - `ES__POPULATE__COUNT=100000` sets the number of records to write
//!
//! # YAML Configuration File
//!
//! The above configuration in YAML format would look like this:
//!
//! ```yaml
//! etcd:
//!   cluster_urls: https://10.0.0.1:4001,https://10.0.0.2:4001
//!   cert_file: /certs/client.crt
//!   key_file: /certs/client.key
//!
//! populate:
//!   count: 100000
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use etcdstress_filler::filler::DEFAULT_WORKERS;
use etcdstress_filler::pool::DEFAULT_QUEUE_DEPTH;
use etcdstress_filler::record::DEFAULT_PREFIX;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "ES__";

/// Errors in the etcd connection options.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A cluster URL could not be parsed.
    #[error("invalid cluster URL: '{url}', error: [{source}]")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// The parse failure.
        #[source]
        source: url::ParseError,
    },
    /// The cluster URLs use a scheme other than `http` or `https`.
    #[error("invalid scheme: {0}")]
    InvalidScheme(String),
    /// The cluster URLs mix `http` and `https`.
    #[error("multiple url schemes provided: {0}")]
    MixedSchemes(String),
    /// `https` was requested without a client certificate.
    #[error("cert file must be provided for https connections")]
    MissingCertFile,
    /// `https` was requested without a client key.
    #[error("key file must be provided for https connections")]
    MissingKeyFile,
}

/// Connection settings of the etcd cluster.
///
/// Used in: [`Config::etcd`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Etcd {
    /// Comma-separated list of etcd URLs (`scheme://ip:port`).
    ///
    /// All URLs must use the same scheme, either `http` or `https`. Requests rotate across the
    /// cluster and move on to the next URL if a member cannot be reached.
    ///
    /// # Default
    ///
    /// `http://127.0.0.1:4001`
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__CLUSTER_URLS`
    pub cluster_urls: String,

    /// Location of the client certificate for mutual auth.
    ///
    /// Required for `https` cluster URLs.
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__CERT_FILE`
    pub cert_file: Option<PathBuf>,

    /// Location of the client key for mutual auth.
    ///
    /// Required for `https` cluster URLs.
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__KEY_FILE`
    pub key_file: Option<PathBuf>,

    /// Location of the CA certificate for mutual auth.
    ///
    /// When set, the CA is trusted in addition to the built-in roots.
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__CA_FILE`
    pub ca_file: Option<PathBuf>,

    /// Maximum number of idle keep-alive connections per cluster member.
    ///
    /// `0` keeps the HTTP client's default.
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__MAX_IDLE_CONNS_PER_HOST`
    pub max_idle_conns_per_host: usize,

    /// Timeout for connecting to a member and for every single request.
    ///
    /// # Default
    ///
    /// `10s`
    ///
    /// # Environment Variable
    ///
    /// `ES__ETCD__TIMEOUT`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for Etcd {
    fn default() -> Self {
        Self {
            cluster_urls: "http://127.0.0.1:4001".into(),
            cert_file: None,
            key_file: None,
            ca_file: None,
            max_idle_conns_per_host: 0,
            timeout: Duration::from_secs(10),
        }
    }
}

impl Etcd {
    /// Checks the connection options and resolves them into [`EtcdOptions`].
    pub fn validate(&self) -> Result<EtcdOptions, ConfigError> {
        let mut scheme: Option<String> = None;
        let mut cluster_urls = Vec::new();

        for raw in self.cluster_urls.split(',') {
            let raw = raw.trim();
            let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
                url: raw.to_owned(),
                source,
            })?;

            match &scheme {
                None => {
                    if url.scheme() != "http" && url.scheme() != "https" {
                        return Err(ConfigError::InvalidScheme(raw.to_owned()));
                    }
                    scheme = Some(url.scheme().to_owned());
                }
                Some(scheme) if scheme != url.scheme() => {
                    return Err(ConfigError::MixedSchemes(self.cluster_urls.clone()));
                }
                Some(_) => {}
            }

            cluster_urls.push(url);
        }

        let tls = if scheme.as_deref() == Some("https") {
            let cert_file = self.cert_file.clone().ok_or(ConfigError::MissingCertFile)?;
            let key_file = self.key_file.clone().ok_or(ConfigError::MissingKeyFile)?;
            Some(Tls {
                cert_file,
                key_file,
                ca_file: self.ca_file.clone(),
            })
        } else {
            None
        };

        Ok(EtcdOptions {
            cluster_urls,
            tls,
            max_idle_conns_per_host: self.max_idle_conns_per_host,
            timeout: self.timeout,
        })
    }
}

/// Validated etcd connection options.
#[derive(Debug, Clone)]
pub struct EtcdOptions {
    /// Cluster members, all sharing one scheme. Never empty.
    pub cluster_urls: Vec<Url>,
    /// TLS material, present exactly for `https` clusters.
    pub tls: Option<Tls>,
    /// See [`Etcd::max_idle_conns_per_host`].
    pub max_idle_conns_per_host: usize,
    /// See [`Etcd::timeout`].
    pub timeout: Duration,
}

/// Files for mutual TLS.
#[derive(Debug, Clone)]
pub struct Tls {
    /// PEM encoded client certificate chain, leaf first.
    pub cert_file: PathBuf,
    /// PEM encoded private key of the client certificate.
    pub key_file: PathBuf,
    /// PEM encoded CA certificate to trust.
    pub ca_file: Option<PathBuf>,
}

/// Settings of the population run.
///
/// Used in: [`Config::populate`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Populate {
    /// Number of records to create. Nothing is written for `0`.
    ///
    /// # Environment Variable
    ///
    /// `ES__POPULATE__COUNT`
    pub count: usize,

    /// Number of writes that run concurrently.
    ///
    /// # Default
    ///
    /// `2`
    ///
    /// # Environment Variable
    ///
    /// `ES__POPULATE__WORKERS`
    pub workers: usize,

    /// Number of writes that may wait for a free worker.
    ///
    /// # Environment Variable
    ///
    /// `ES__POPULATE__QUEUE_DEPTH`
    pub queue_depth: usize,

    /// Key prefix all records are written under and that is purged before a run.
    ///
    /// # Default
    ///
    /// `/data`
    ///
    /// # Environment Variable
    ///
    /// `ES__POPULATE__PREFIX`
    pub prefix: String,

    /// Whether to delete everything under [`prefix`](Self::prefix) before writing.
    ///
    /// # Default
    ///
    /// `true`
    ///
    /// # Environment Variable
    ///
    /// `ES__POPULATE__PURGE`
    pub purge: bool,
}

impl Default for Populate {
    fn default() -> Self {
        Self {
            count: 0,
            workers: DEFAULT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            prefix: DEFAULT_PREFIX.into(),
            purge: true,
        }
    }
}

/// Runtime configuration for the Tokio async runtime.
///
/// Used in: [`Config::runtime`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `ES__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided.
///
/// Used in: [`Config::sentry`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN.
    ///
    /// # Environment Variable
    ///
    /// `ES__SENTRY__DSN`
    pub dsn: Option<String>,

    /// Environment name reported with every event.
    ///
    /// # Environment Variable
    ///
    /// `ES__SENTRY__ENVIRONMENT`
    pub environment: Option<String>,

    /// Share of error events to send, from `0.0` to `1.0`.
    ///
    /// # Default
    ///
    /// `1.0`
    ///
    /// # Environment Variable
    ///
    /// `ES__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
        }
    }
}

/// Log output format.
///
/// Parsed case-insensitively, so `json`, `JSON` and `Json` all select [`LogFormat::Json`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum LogFormat {
    /// Pretty printing for a TTY, otherwise simplified.
    Auto,

    /// Pretty printing with colors.
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z INFO etcdstress_filler::filler: queueing started count=1000
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

impl LogFormat {
    const ALL: [Self; 4] = [Self::Auto, Self::Pretty, Self::Simplified, Self::Json];

    fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Pretty => "pretty",
            Self::Simplified => "simplified",
            Self::Json => "json",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A log format name that is not one of the [`LogFormat`] variants.
#[derive(Clone, Debug, thiserror::Error)]
#[error("unknown log format `{0}`, expected auto, pretty, simplified or json")]
pub struct FormatParseError(String);

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Auto);
        }

        Self::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| FormatParseError(s.to_owned()))
    }
}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr.
///
/// Used in: [`Config::logging`]
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Replaced by `RUST_LOG` if that is set to a plain level such as `debug`. Any other
    /// `RUST_LOG` value is used as a list of per-module directives instead of this level.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `ES__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format. See [`LogFormat`] for available options.
    ///
    /// # Default
    ///
    /// `auto`
    ///
    /// # Environment Variable
    ///
    /// `ES__LOGGING__FORMAT`
    #[serde(with = "display_fromstr")]
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct of etcdstress.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Connection to the etcd cluster. See [`Etcd`].
    pub etcd: Etcd,

    /// The population run. See [`Populate`].
    pub populate: Populate,

    /// Configuration of the internal task runtime. See [`Runtime`].
    pub runtime: Runtime,

    /// Log verbosity and output format. See [`Logging`].
    pub logging: Logging,

    /// Optional error reporting to Sentry. See [`Sentry`].
    pub sentry: Sentry,
}

impl Config {
    /// Loads configuration from defaults, an optional YAML file and the environment.
    ///
    /// Configuration is merged in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. YAML configuration file (if provided)
    /// 3. Environment variables (prefixed with `ES__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = figment::Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn etcd(cluster_urls: &str) -> Etcd {
        Etcd {
            cluster_urls: cluster_urls.into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = Config::load(None).unwrap();

            assert_eq!(config.etcd.cluster_urls, "http://127.0.0.1:4001");
            assert_eq!(config.populate.count, 0);
            assert_eq!(config.populate.workers, 2);
            assert_eq!(config.populate.prefix, "/data");
            assert!(config.populate.purge);
            assert!(!config.sentry.is_enabled());
            assert_eq!(config.logging.level, LevelFilter::INFO);

            Ok(())
        });
    }

    #[test]
    fn configurable_via_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ES__ETCD__CLUSTER_URLS", "https://10.0.0.1:4001");
            jail.set_env("ES__ETCD__CERT_FILE", "/certs/client.crt");
            jail.set_env("ES__ETCD__TIMEOUT", "2s");
            jail.set_env("ES__POPULATE__COUNT", "5000");
            jail.set_env("ES__POPULATE__PURGE", "false");
            jail.set_env("ES__LOGGING__LEVEL", "debug");
            jail.set_env("ES__LOGGING__FORMAT", "json");
            jail.set_env("ES__SENTRY__DSN", "abcde");

            let config = Config::load(None).unwrap();

            assert_eq!(config.etcd.cluster_urls, "https://10.0.0.1:4001");
            assert_eq!(
                config.etcd.cert_file.as_deref(),
                Some(Path::new("/certs/client.crt"))
            );
            assert_eq!(config.etcd.timeout, Duration::from_secs(2));
            assert_eq!(config.populate.count, 5000);
            assert!(!config.populate.purge);
            assert_eq!(config.logging.level, LevelFilter::DEBUG);
            assert_eq!(config.logging.format, LogFormat::Json);
            assert_eq!(config.sentry.dsn.as_deref(), Some("abcde"));

            Ok(())
        });
    }

    #[test]
    fn configured_with_env_and_yaml() {
        let mut tempfile = tempfile::NamedTempFile::new().unwrap();
        tempfile
            .write_all(
                br#"
            etcd:
                cluster_urls: http://10.0.0.1:4001,http://10.0.0.2:4001
            populate:
                count: 1000
                workers: 8
            "#,
            )
            .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("ES__POPULATE__WORKERS", "16");

            let config = Config::load(Some(tempfile.path())).unwrap();

            assert_eq!(
                config.etcd.cluster_urls,
                "http://10.0.0.1:4001,http://10.0.0.2:4001"
            );
            assert_eq!(config.populate.count, 1000);
            // Env should overwrite the yaml config
            assert_eq!(config.populate.workers, 16);

            Ok(())
        });
    }

    #[test]
    fn validates_plain_cluster() {
        let options = etcd(" http://10.0.0.1:4001 , http://10.0.0.2:4001").validate().unwrap();

        assert_eq!(options.cluster_urls.len(), 2);
        assert_eq!(options.cluster_urls[1].as_str(), "http://10.0.0.2:4001/");
        assert!(options.tls.is_none());
    }

    #[test]
    fn rejects_unparseable_url() {
        let err = etcd("http://ok:4001,::nope").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { ref url, .. } if url == "::nope"));
    }

    #[test]
    fn rejects_empty_cluster() {
        let err = etcd("").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrl { .. }));
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = etcd("ftp://10.0.0.1:4001").validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidScheme(_)));
    }

    #[test]
    fn rejects_mixed_schemes() {
        let err = etcd("http://10.0.0.1:4001,https://10.0.0.2:4001")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MixedSchemes(_)));
    }

    #[test]
    fn https_requires_cert_and_key() {
        let mut config = etcd("https://10.0.0.1:4001");
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingCertFile
        ));

        config.cert_file = Some("client.crt".into());
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::MissingKeyFile
        ));

        config.key_file = Some("client.key".into());
        config.ca_file = Some("ca.crt".into());
        let tls = config.validate().unwrap().tls.unwrap();
        assert_eq!(tls.cert_file, Path::new("client.crt"));
        assert_eq!(tls.key_file, Path::new("client.key"));
        assert_eq!(tls.ca_file.as_deref(), Some(Path::new("ca.crt")));
    }

    #[test]
    fn log_format_is_case_insensitive() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ES__LOGGING__FORMAT", "PRETTY");
            let config = Config::load(None).unwrap();
            assert_eq!(config.logging.format, LogFormat::Pretty);

            jail.set_env("ES__LOGGING__FORMAT", "Simplified");
            let config = Config::load(None).unwrap();
            assert_eq!(config.logging.format, LogFormat::Simplified);

            Ok(())
        });
    }

    #[test]
    fn rejects_unknown_log_format() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ES__LOGGING__FORMAT", "xml");
            let err = Config::load(None).unwrap_err();
            assert!(err.to_string().contains("unknown log format `xml`"));

            Ok(())
        });
    }

    #[test]
    fn log_format_names_round_trip() {
        for format in LogFormat::ALL {
            assert_eq!(format.to_string().parse::<LogFormat>().unwrap(), format);
        }
        assert_eq!("".parse::<LogFormat>().unwrap(), LogFormat::Auto);
    }
}
