use std::net::TcpListener;

use etcdstress::config::{Etcd, Populate};
use etcdstress::etcd::EtcdClient;
use etcdstress::populate::populate;
use etcdstress::purge::purge;
use etcdstress_filler::Error;
use etcdstress_test::server::FakeEtcd;

fn client(cluster_urls: &str) -> EtcdClient {
    let options = Etcd {
        cluster_urls: cluster_urls.into(),
        ..Default::default()
    }
    .validate()
    .unwrap();

    EtcdClient::new(&options).unwrap()
}

fn populate_config(count: usize) -> Populate {
    Populate {
        count,
        workers: 4,
        queue_depth: 16,
        ..Default::default()
    }
}

/// Returns a URL on localhost that refuses connections.
fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn sets_and_deletes_keys() {
    etcdstress_test::tracing::init();
    let etcd = FakeEtcd::new().await;
    let client = client(&etcd.url());

    client.set("/data/a", "one").await.unwrap();
    client.set("/data/a", "two").await.unwrap();
    assert_eq!(etcd.get("/data/a").as_deref(), Some("two"));

    client.delete("/data/a", false).await.unwrap();
    assert!(etcd.keys().is_empty());

    let err = client.delete("/data/a", false).await.unwrap_err();
    assert!(err.is_key_not_found());
}

#[tokio::test]
async fn surfaces_server_errors() {
    let etcd = FakeEtcd::failing_every(1).await;
    let client = client(&etcd.url());

    let err = client.set("/data/a", "one").await.unwrap_err();
    assert!(!err.is_key_not_found());
    assert!(err.to_string().contains("Raft Internal Error"));
}

#[tokio::test]
async fn purging_missing_prefix_is_a_noop() {
    etcdstress_test::tracing::init();
    let etcd = FakeEtcd::new().await;
    etcd.insert("/other/keep", "x");

    purge(&client(&etcd.url()), "/data").await.unwrap();

    assert_eq!(etcd.keys(), ["/other/keep"]);
}

#[tokio::test]
async fn purges_everything_below_prefix() {
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/a", "x");
    etcd.insert("/data/nested/b", "x");
    etcd.insert("/database", "x");

    purge(&client(&etcd.url()), "/data").await.unwrap();

    assert_eq!(etcd.keys(), ["/database"]);
}

#[tokio::test]
async fn purge_keeps_query_characters_in_prefix() {
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/keep", "x");
    etcd.insert("/data?x/gone", "x");

    purge(&client(&etcd.url()), "/data?x").await.unwrap();

    assert_eq!(etcd.keys(), ["/data/keep"]);
}

#[tokio::test]
async fn purge_of_unrelated_prefix_with_query_characters_is_a_noop() {
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/keep", "x");

    purge(&client(&etcd.url()), "/data?x").await.unwrap();

    assert_eq!(etcd.keys(), ["/data/keep"]);
}

#[tokio::test]
async fn refuses_to_purge_root() {
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/a", "x");

    purge(&client(&etcd.url()), "/").await.unwrap_err();

    assert_eq!(etcd.keys().len(), 1);
}

#[tokio::test]
async fn purge_fails_on_unreachable_cluster() {
    let err = purge(&client(&dead_url()), "/data").await.unwrap_err();
    assert!(err.to_string().contains("failed to purge `/data`"));
}

#[tokio::test]
async fn populates_after_purging() {
    etcdstress_test::tracing::init();
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/stale", "x");
    etcd.insert("/other/keep", "x");

    let written = populate(client(&etcd.url()), &populate_config(200))
        .await
        .unwrap();

    assert_eq!(written, 200);
    assert_eq!(etcd.writes(), 200);

    let keys = etcd.keys();
    assert!(!keys.iter().any(|k| k == "/data/stale"));
    assert!(keys.iter().any(|k| k == "/other/keep"));
    let records: Vec<_> = keys.iter().filter(|k| k.starts_with("/data/")).collect();
    assert_eq!(records.len(), 200);

    let value = etcd.get(records[0]).unwrap();
    let payload: serde_json::Value = serde_json::from_str(&value).unwrap();
    assert!(payload.is_object());
}

#[tokio::test]
async fn prefix_characters_are_part_of_the_key() {
    let etcd = FakeEtcd::new().await;

    for prefix in ["/run?1", "/run#2", "/run%3"] {
        let config = Populate {
            prefix: prefix.into(),
            ..populate_config(50)
        };
        let written = populate(client(&etcd.url()), &config).await.unwrap();
        assert_eq!(written, 50);

        let scope = format!("{prefix}/");
        let keys = etcd.keys();
        assert_eq!(keys.iter().filter(|k| k.starts_with(&scope)).count(), 50);
    }

    assert_eq!(etcd.keys().len(), 150);
}

#[tokio::test]
async fn keeps_existing_data_without_purge() {
    let etcd = FakeEtcd::new().await;
    etcd.insert("/data/stale", "x");

    let config = Populate {
        purge: false,
        ..populate_config(10)
    };
    populate(client(&etcd.url()), &config).await.unwrap();

    assert_eq!(etcd.keys().len(), 11);
    assert_eq!(etcd.get("/data/stale").as_deref(), Some("x"));
}

#[tokio::test]
async fn tolerates_few_failed_writes() {
    let etcd = FakeEtcd::failing_every(20).await;

    let written = populate(client(&etcd.url()), &populate_config(1000))
        .await
        .unwrap();

    assert_eq!(written, 950);
    assert_eq!(etcd.keys().len(), 950);
}

#[tokio::test]
async fn rejects_too_many_failed_writes() {
    let etcd = FakeEtcd::failing_every(15).await;

    let err = populate(client(&etcd.url()), &populate_config(1000))
        .await
        .unwrap_err();

    let err = err.downcast_ref::<Error>().unwrap();
    assert!(matches!(err, Error::ToleranceExceeded { .. }));
}

#[tokio::test]
async fn fails_over_to_reachable_member() {
    let etcd = FakeEtcd::new().await;
    let client = client(&format!("{},{}", dead_url(), etcd.url()));

    for i in 0..4 {
        client.set(&format!("/data/{i}"), "x").await.unwrap();
    }

    assert_eq!(etcd.keys().len(), 4);
}
