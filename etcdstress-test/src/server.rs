//! Exposes an in-process fake of the etcd v2 keys API for use in integration tests.
//!
//! ```
//! use etcdstress_test::server::FakeEtcd;
//!
//! #[tokio::main]
//! async fn main() {
//!    let etcd = FakeEtcd::new().await;
//!    let url = etcd.url();
//!    // point the client at the URL...
//! }
//! ```
//!
//! Only the subset of the API used by etcdstress is emulated: setting a key with `PUT` and
//! (recursively) deleting keys with `DELETE`. Error responses carry the same JSON body as etcd.

use std::collections::BTreeMap;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::put;
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;

const KEY_NOT_FOUND: u32 = 100;
const NOT_A_FILE: u32 = 102;
const RAFT_INTERNAL_ERROR: u32 = 300;

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<String, String>,
    index: u64,
    writes: usize,
    fail_every: Option<usize>,
}

type Shared = Arc<Mutex<Inner>>;

/// An in-process etcd fake listening on a random port on localhost.
///
/// All data is kept in memory and discarded when the server is dropped.
#[derive(Debug)]
pub struct FakeEtcd {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    state: Shared,
}

impl FakeEtcd {
    /// Starts a fake that accepts every request.
    pub async fn new() -> Self {
        Self::start(None)
    }

    /// Starts a fake that rejects every `n`-th write with a raft error.
    pub async fn failing_every(n: usize) -> Self {
        assert!(n > 0, "n must be positive");
        Self::start(Some(n))
    }

    fn start(fail_every: Option<usize>) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let state = Shared::new(Mutex::new(Inner {
            fail_every,
            ..Default::default()
        }));

        let app = Router::new()
            .route("/v2/keys/{*key}", put(set_key).delete(delete_key))
            .with_state(Arc::clone(&state));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            state,
        }
    }

    /// Returns the base URL of the fake, suitable as a cluster URL.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.socket.port())
    }

    /// Returns all stored keys in lexicographic order.
    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().entries.keys().cloned().collect()
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().entries.get(key).cloned()
    }

    /// Stores a value directly, bypassing the HTTP API.
    pub fn insert(&self, key: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .entries
            .insert(key.to_owned(), value.to_owned());
    }

    /// Returns the number of write requests received, including rejected ones.
    pub fn writes(&self) -> usize {
        self.state.lock().unwrap().writes
    }
}

impl Drop for FakeEtcd {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Deserialize)]
struct SetForm {
    value: String,
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    #[serde(default)]
    recursive: bool,
}

async fn set_key(
    State(state): State<Shared>,
    Path(key): Path<String>,
    Form(form): Form<SetForm>,
) -> Response {
    let key = format!("/{key}");
    let mut inner = state.lock().unwrap();
    inner.writes += 1;

    if inner.fail_every.is_some_and(|n| inner.writes % n == 0) {
        return etcd_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            RAFT_INTERNAL_ERROR,
            "Raft Internal Error",
            &key,
            inner.index,
        );
    }

    inner.index += 1;
    let index = inner.index;
    let existed = inner
        .entries
        .insert(key.clone(), form.value.clone())
        .is_some();

    let status = if existed {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let body = json!({
        "action": "set",
        "node": {
            "key": key,
            "value": form.value,
            "modifiedIndex": index,
            "createdIndex": index,
        },
    });

    (status, Json(body)).into_response()
}

async fn delete_key(
    State(state): State<Shared>,
    Path(key): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Response {
    let key = format!("/{}", key.trim_end_matches('/'));
    let dir_prefix = format!("{key}/");
    let mut inner = state.lock().unwrap();

    let is_dir = inner.entries.keys().any(|k| k.starts_with(&dir_prefix));
    if is_dir && !params.recursive {
        return etcd_error(
            StatusCode::FORBIDDEN,
            NOT_A_FILE,
            "Not a file",
            &key,
            inner.index,
        );
    }

    let removed_file = inner.entries.remove(&key).is_some();
    if is_dir {
        inner.entries.retain(|k, _| !k.starts_with(&dir_prefix));
    }
    if !removed_file && !is_dir {
        return etcd_error(
            StatusCode::NOT_FOUND,
            KEY_NOT_FOUND,
            "Key not found",
            &key,
            inner.index,
        );
    }

    inner.index += 1;
    let body = json!({
        "action": "delete",
        "node": {
            "key": key,
            "dir": is_dir,
            "modifiedIndex": inner.index,
        },
    });

    (StatusCode::OK, Json(body)).into_response()
}

fn etcd_error(status: StatusCode, code: u32, message: &str, cause: &str, index: u64) -> Response {
    let body = json!({
        "errorCode": code,
        "message": message,
        "cause": cause,
        "index": index,
    });

    (status, Json(body)).into_response()
}
