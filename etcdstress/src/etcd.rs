//! A minimal client for the etcd v2 keys API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use etcdstress_filler::Store;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::config::{EtcdOptions, Tls};

const USER_AGENT: &str = concat!("etcdstress/", env!("CARGO_PKG_VERSION"));

/// etcd error code for a key that does not exist.
pub const KEY_NOT_FOUND: u32 = 100;

/// The error body etcd returns for rejected requests.
#[derive(Debug, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} ({cause}) [{error_code}]")]
pub struct ApiError {
    /// The etcd error code, such as [`KEY_NOT_FOUND`].
    pub error_code: u32,
    /// Human readable description of the error code.
    pub message: String,
    /// The key or condition that caused the error.
    #[serde(default)]
    pub cause: String,
    /// The etcd index at the time of the error.
    #[serde(default)]
    pub index: u64,
}

/// Errors returned by the [`EtcdClient`].
#[derive(Debug, thiserror::Error)]
pub enum EtcdError {
    /// etcd rejected the request.
    #[error("etcd error: {0}")]
    Api(#[from] ApiError),
    /// etcd answered with an error status but no error body.
    #[error("unexpected response status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        body: String,
    },
    /// The request could not be sent or its response could not be read.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

impl EtcdError {
    /// Returns `true` if etcd reported that the key does not exist.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, Self::Api(err) if err.error_code == KEY_NOT_FOUND)
    }
}

/// A client talking to an etcd cluster over HTTP.
///
/// Requests are spread across the cluster members in turn. If a member cannot be reached, the
/// request moves on to the next one. The client is cheap to clone and shares its connection pool.
#[derive(Debug, Clone)]
pub struct EtcdClient {
    http: reqwest::Client,
    members: Arc<[Url]>,
    cursor: Arc<AtomicUsize>,
}

impl EtcdClient {
    /// Creates a client for the validated connection options.
    ///
    /// This reads the TLS material from disk for `https` clusters.
    pub fn new(options: &EtcdOptions) -> anyhow::Result<Self> {
        anyhow::ensure!(!options.cluster_urls.is_empty(), "no etcd cluster URLs");
        if let Some(member) = options.cluster_urls.iter().find(|url| url.cannot_be_a_base()) {
            anyhow::bail!("cluster URL `{member}` cannot carry a key path");
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(options.timeout)
            .timeout(options.timeout);

        if options.max_idle_conns_per_host > 0 {
            builder = builder.pool_max_idle_per_host(options.max_idle_conns_per_host);
        }

        if let Some(tls) = &options.tls {
            builder = configure_tls(builder, tls)?;
        }

        Ok(Self {
            http: builder.build().context("failed to build HTTP client")?,
            members: options.cluster_urls.clone().into(),
            cursor: Arc::default(),
        })
    }

    /// Sets `key` to `value`, creating the key if it does not exist.
    pub async fn set(&self, key: &str, value: &str) -> Result<(), EtcdError> {
        let response = self
            .send(|member| self.http.put(keys_url(member, key)).form(&[("value", value)]))
            .await?;

        check(response).await
    }

    /// Deletes `key`, including all keys below it if `recursive` is set.
    pub async fn delete(&self, key: &str, recursive: bool) -> Result<(), EtcdError> {
        let response = self
            .send(|member| {
                let request = self.http.delete(keys_url(member, key));
                if recursive {
                    request.query(&[("recursive", "true")])
                } else {
                    request
                }
            })
            .await?;

        check(response).await
    }

    async fn send<F>(&self, build: F) -> Result<Response, EtcdError>
    where
        F: Fn(&Url) -> RequestBuilder,
    {
        let count = self.members.len();
        let first = self.cursor.fetch_add(1, Ordering::Relaxed);

        let mut attempt = 0;
        loop {
            let member = &self.members[(first + attempt) % count];
            attempt += 1;

            match build(member).send().await {
                Err(err) if err.is_connect() && attempt < count => {
                    tracing::debug!(
                        %member,
                        error = &err as &dyn std::error::Error,
                        "etcd member unreachable, trying next"
                    );
                }
                result => return Ok(result?),
            }
        }
    }
}

#[async_trait::async_trait]
impl Store for EtcdClient {
    async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.set(key, value).await?;
        Ok(())
    }
}

fn configure_tls(
    builder: reqwest::ClientBuilder,
    tls: &Tls,
) -> anyhow::Result<reqwest::ClientBuilder> {
    let mut pem = std::fs::read(&tls.cert_file).with_context(|| {
        format!("failed to read cert file {}", tls.cert_file.display())
    })?;
    pem.push(b'\n');
    pem.extend(std::fs::read(&tls.key_file).with_context(|| {
        format!("failed to read key file {}", tls.key_file.display())
    })?);

    let identity =
        reqwest::Identity::from_pem(&pem).context("failed to load client certificate and key")?;
    let mut builder = builder.use_rustls_tls().identity(identity);

    if let Some(ca_file) = &tls.ca_file {
        let ca = std::fs::read(ca_file)
            .with_context(|| format!("failed to read CA file {}", ca_file.display()))?;
        let ca = reqwest::Certificate::from_pem(&ca).context("failed to load CA certificate")?;
        builder = builder.add_root_certificate(ca);
    }

    Ok(builder)
}

/// Builds the keys API URL of `key` on `member`.
///
/// Every segment of the key is percent-encoded, so characters like `?`, `#` and `%` stay part of
/// the key instead of turning into a query or fragment.
fn keys_url(member: &Url, key: &str) -> Url {
    let mut url = member.clone();
    url.set_query(None);
    url.set_fragment(None);

    // Members are checked to be base URLs in `EtcdClient::new`.
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .extend(["v2", "keys"])
            .extend(key.split('/').filter(|segment| !segment.is_empty()));
    }

    url
}

async fn check(response: Response) -> Result<(), EtcdError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.bytes().await?;
    match serde_json::from_slice::<ApiError>(&body) {
        Ok(err) => Err(err.into()),
        Err(_) => Err(EtcdError::Status {
            status,
            body: String::from_utf8_lossy(&body).into_owned(),
        }),
    }
}
