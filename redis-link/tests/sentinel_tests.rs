//! Sentinel resolution, failover and the admin client

mod support;

use redis_link::{
    Client, ConnectionConfig, ConnectionState, LocalBus, RedisError, RedisValue, Request,
    RespValue, SentinelClient, SentinelEndpoint,
};
use std::sync::Arc;
use std::time::Duration;
use support::{accept, array, bulk, ok, MockConnector, MockServer, WAIT};
use tokio::sync::mpsc;

fn sentinel_config(ports: &[u16]) -> ConnectionConfig {
    ConnectionConfig::default()
        .with_sentinel(
            "mymaster",
            ports.iter().map(|p| SentinelEndpoint::new("sentinel", *p)).collect(),
        )
        .with_sentinel_timeout(WAIT)
        .with_retry_interval(Duration::from_millis(20))
}

fn client(
    config: ConnectionConfig,
) -> (
    Client,
    Arc<MockConnector>,
    mpsc::UnboundedReceiver<MockServer>,
) {
    support::init_tracing();
    let (connector, servers) = MockConnector::new();
    let bus = Arc::new(LocalBus::new());
    let client = Client::with_connector(config, connector.clone(), bus).unwrap();
    (client, connector, servers)
}

async fn answer_master_query(sentinel: &mut MockServer, host: &str, port: u16) {
    sentinel
        .expect(&["SENTINEL", "get-master-addr-by-name", "mymaster"])
        .await;
    sentinel
        .reply(array(vec![bulk(host), bulk(&port.to_string())]))
        .await;
}

fn role(name: &str) -> RespValue {
    array(vec![bulk(name), RespValue::Integer(0), array(vec![])])
}

#[tokio::test]
async fn test_unreachable_sentinel_is_skipped_and_answering_one_promoted() {
    let (client, connector, mut servers) = client(sentinel_config(&[26379, 26380]));
    connector.refuse("sentinel:26379");

    let get = client.send(Request::new("GET").arg("k"));

    let mut sentinel = accept(&mut servers).await;
    assert_eq!(sentinel.addr, "sentinel:26380");
    answer_master_query(&mut sentinel, "master", 6380).await;

    let mut master = accept(&mut servers).await;
    assert_eq!(master.addr, "master:6380");
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;
    master.expect(&["GET", "k"]).await;
    master.reply(bulk("v")).await;

    assert_eq!(get.await.unwrap(), RedisValue::from("v"));
    assert_eq!(
        connector.attempts(),
        vec!["sentinel:26379", "sentinel:26380", "master:6380"]
    );

    let stats = client.connection().stats().await.unwrap();
    assert_eq!(
        stats.sentinels,
        vec![
            SentinelEndpoint::new("sentinel", 26380),
            SentinelEndpoint::new("sentinel", 26379),
        ]
    );
}

#[tokio::test]
async fn test_handshake_order_with_auth_and_database() {
    let config = sentinel_config(&[26379])
        .with_password("pw")
        .with_database(1);
    let (client, _connector, mut servers) = client(config);

    let ping = client.send(Request::new("PING"));

    let mut sentinel = accept(&mut servers).await;
    answer_master_query(&mut sentinel, "master", 6379).await;

    let mut master = accept(&mut servers).await;
    master.expect(&["AUTH", "pw"]).await;
    master.reply(ok()).await;
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;
    master.expect(&["SELECT", "1"]).await;
    master.reply(ok()).await;
    master.expect(&["PING"]).await;
    master.reply(RespValue::SimpleString("PONG".into())).await;

    assert_eq!(ping.await.unwrap(), RedisValue::from("PONG"));
}

#[tokio::test]
async fn test_replica_answer_fails_queue_and_retries() {
    let (client, _connector, mut servers) = client(sentinel_config(&[26379]));

    let get = client.send(Request::new("GET").arg("k"));

    let mut sentinel = accept(&mut servers).await;
    answer_master_query(&mut sentinel, "stale", 6379).await;
    let mut replica = accept(&mut servers).await;
    replica.expect(&["ROLE"]).await;
    replica.reply(role("slave")).await;

    assert!(matches!(get.await, Err(RedisError::Sentinel(_))));

    // a new resolution round starts after the retry interval
    let mut sentinel = accept(&mut servers).await;
    assert_eq!(sentinel.addr, "sentinel:26379");
    answer_master_query(&mut sentinel, "master", 6379).await;
    let mut master = accept(&mut servers).await;
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;

    let get = client.send(Request::new("GET").arg("k"));
    master.expect(&["GET", "k"]).await;
    master.reply(bulk("fresh")).await;
    assert_eq!(get.await.unwrap(), RedisValue::from("fresh"));
}

#[tokio::test]
async fn test_exhausted_sentinels_fail_queue_and_keep_retrying() {
    let (client, connector, _servers) = client(sentinel_config(&[26379, 26380]));
    connector.refuse("sentinel:26379");
    connector.refuse("sentinel:26380");

    let get = client.send(Request::new("GET").arg("k"));
    match get.await {
        Err(RedisError::Sentinel(msg)) => assert_eq!(msg, "failed to connect sentinels"),
        other => panic!("unexpected result: {other:?}"),
    }

    tokio::time::timeout(WAIT, async {
        while connector.attempts().len() < 4 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_unknown_master_moves_to_next_sentinel() {
    let (client, _connector, mut servers) = client(sentinel_config(&[26379, 26380]));
    let ping = client.send(Request::new("PING"));

    let mut first = accept(&mut servers).await;
    first
        .expect(&["SENTINEL", "get-master-addr-by-name", "mymaster"])
        .await;
    first.reply(RespValue::NullArray).await;

    let mut second = accept(&mut servers).await;
    assert_eq!(second.addr, "sentinel:26380");
    answer_master_query(&mut second, "master", 6379).await;

    let mut master = accept(&mut servers).await;
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;
    master.expect(&["PING"]).await;
    master.reply(RespValue::SimpleString("PONG".into())).await;
    assert_eq!(ping.await.unwrap(), RedisValue::from("PONG"));
}

#[tokio::test]
async fn test_failover_across_three_sentinels() {
    let (client, connector, mut servers) = client(sentinel_config(&[26379, 26380, 26381]));
    connector.refuse("sentinel:26379");

    let get = client.send(Request::new("GET").arg("k"));

    let mut forgetful = accept(&mut servers).await;
    assert_eq!(forgetful.addr, "sentinel:26380");
    forgetful
        .expect(&["SENTINEL", "get-master-addr-by-name", "mymaster"])
        .await;
    forgetful.reply(RespValue::NullArray).await;

    let mut sentinel = accept(&mut servers).await;
    assert_eq!(sentinel.addr, "sentinel:26381");
    answer_master_query(&mut sentinel, "master", 6379).await;

    let mut master = accept(&mut servers).await;
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;
    master.expect(&["GET", "k"]).await;
    master.reply(bulk("v")).await;
    assert_eq!(get.await.unwrap(), RedisValue::from("v"));

    let stats = client.connection().stats().await.unwrap();
    assert_eq!(
        stats.sentinels,
        vec![
            SentinelEndpoint::new("sentinel", 26381),
            SentinelEndpoint::new("sentinel", 26379),
            SentinelEndpoint::new("sentinel", 26380),
        ]
    );

    // the master goes away; the promoted Sentinel is asked first
    let mut state = client.connection().watch_state();
    drop(master);
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == ConnectionState::Disconnected))
        .await
        .unwrap()
        .unwrap();

    let ping = client.send(Request::new("PING"));
    let mut sentinel = accept(&mut servers).await;
    assert_eq!(sentinel.addr, "sentinel:26381");
    answer_master_query(&mut sentinel, "replacement", 6380).await;

    let mut master = accept(&mut servers).await;
    assert_eq!(master.addr, "replacement:6380");
    master.expect(&["ROLE"]).await;
    master.reply(role("master")).await;
    master.expect(&["PING"]).await;
    master.reply(RespValue::SimpleString("PONG".into())).await;
    assert_eq!(ping.await.unwrap(), RedisValue::from("PONG"));
}

#[tokio::test]
async fn test_sentinel_client_queries() {
    support::init_tracing();
    let (connector, mut servers) = MockConnector::new();
    let config = ConnectionConfig::new("sentinel:26379");
    let sentinel = SentinelClient::with_connector(config, connector).unwrap();

    let known = sentinel.get_master_addr_by_name("mymaster");
    let unknown = sentinel.get_master_addr_by_name("other");
    let quorum = sentinel.ckquorum("mymaster");
    let serve = async {
        let mut server = accept(&mut servers).await;
        server
            .expect(&["SENTINEL", "get-master-addr-by-name", "mymaster"])
            .await;
        server
            .expect(&["SENTINEL", "get-master-addr-by-name", "other"])
            .await;
        server.expect(&["SENTINEL", "ckquorum", "mymaster"]).await;
        server
            .reply(array(vec![bulk("10.0.0.5"), bulk("6380")]))
            .await;
        server.reply(RespValue::NullArray).await;
        server
            .reply(RespValue::SimpleString("OK 3 usable Sentinels".into()))
            .await;
        server
    };
    let (known, unknown, quorum, _server) = tokio::join!(known, unknown, quorum, serve);

    assert_eq!(known.unwrap(), Some(("10.0.0.5".to_string(), 6380)));
    assert_eq!(unknown.unwrap(), None);
    assert_eq!(quorum.unwrap(), "OK 3 usable Sentinels");
}
