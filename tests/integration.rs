//! End-to-end tests against an in-process data service.

mod support;

use std::time::Duration;

use dataservice_client::codec::{AttrType, ObjectAttr, ObjectData};
use dataservice_client::{ClientError, ConnectionState, RequestType, TagValues};
use support::MockServer;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn tag_map(pairs: &[(&str, &str)]) -> TagValues {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn next_push(rx: &mut mpsc::UnboundedReceiver<TagValues>) -> TagValues {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("callback not invoked")
        .unwrap()
}

#[tokio::test]
async fn test_read_data_round_trip() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;
    assert!(client.is_connected());

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        assert_eq!(request.request_type(), RequestType::ReadData);
        assert_eq!(request.text(), "t1@@t2@@");
        conn.reply(&request, b"1.5@@2.5@@").await;
        conn
    });

    let values = client.read_data(&["t1", "t2"]).await.unwrap();
    assert_eq!(values, vec!["1.5", "2.5"]);
    server_side.await.unwrap();
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_replies_out_of_order_reach_their_callers() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        let first = conn.recv().await;
        let second = conn.recv().await;
        assert_ne!(first.header.seq, second.header.seq);
        // answer in reverse order, echoing the requested tag
        let answer = |r: &support::Request| format!("{}value@@", r.text().trim_end_matches("@@"));
        conn.reply(&second, answer(&second).as_bytes()).await;
        conn.reply(&first, answer(&first).as_bytes()).await;
        conn
    });

    let (a, b) = tokio::join!(client.read_data(&["a"]), client.read_data(&["b"]));
    assert_eq!(a.unwrap(), vec!["avalue"]);
    assert_eq!(b.unwrap(), vec!["bvalue"]);
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_timeout_and_late_reply_is_dropped() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let (late_tx, late_rx) = tokio::sync::oneshot::channel();
    let server_side = tokio::spawn(async move {
        let stale = conn.recv().await;
        late_rx.await.unwrap();
        conn.reply(&stale, b"stale@@").await;

        let fresh = conn.recv().await;
        assert_ne!(fresh.header.seq, stale.header.seq);
        conn.reply(&fresh, b"fresh@@").await;
        conn
    });

    let err = client.read_data(&["t1"]).await.unwrap_err();
    assert_eq!(err.code(), 1004);
    match err {
        ClientError::Timeout { timeout, .. } => assert_eq!(timeout, Duration::from_millis(500)),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(client.pending_requests(), 0);

    late_tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client.read_data(&["t1"]).await.unwrap(), vec!["fresh"]);
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_server_flag_is_an_error() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        assert_eq!(request.request_type(), RequestType::ControlData);
        assert_eq!(request.text(), "valve@@open@@");
        conn.reply_flag(&request, 3, b"").await;
        conn
    });

    let err = client
        .control_data(&["valve"], &["open"])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Server {
            request: RequestType::ControlData,
            flag: 3
        }
    ));
    assert_eq!(err.code(), 3);
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_save_data_sends_pairs() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        assert_eq!(request.request_type(), RequestType::DumpData);
        assert_eq!(request.text(), "n1@@v1@@n2@@v2@@");
        conn.reply(&request, b"").await;
        conn
    });

    client
        .save_data(&["n1", "n2"], &["v1", "v2"])
        .await
        .unwrap();
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_read_data_count_mismatch_is_malformed() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        conn.reply(&request, b"only-one@@").await;
        conn
    });

    assert!(matches!(
        client.read_data(&["t1", "t2"]).await,
        Err(ClientError::MalformedPayload(_))
    ));
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_subscription_push_reaches_callback() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let server_side = tokio::spawn(async move {
        let request = conn.accept_registration().await;
        assert_eq!(request.header.batch_id(), 1);
        assert_eq!(request.header.interval_ms(), 200);
        assert_eq!(request.text(), "a@@b@@");
        conn
    });

    let batch_id = client
        .subscribe(&["a", "b"], 200, move |values| {
            let _ = tx.send(values);
        })
        .await
        .unwrap();
    assert_eq!(batch_id, 1);
    assert_eq!(client.subscription_count(), 1);

    let mut conn = server_side.await.unwrap();
    // unknown batch, server failure and odd field count are all dropped
    conn.push(9, 0, b"a@@0@@").await;
    conn.push(batch_id, 2, b"a@@0@@").await;
    conn.push(batch_id, 0, b"a@@0@@b@@").await;
    conn.push(batch_id, 0, b"a@@1@@b@@2@@").await;

    assert_eq!(next_push(&mut rx).await, tag_map(&[("a", "1"), ("b", "2")]));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_invalid_subscribe_sends_nothing() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let empty: &[&str] = &[];
    assert!(matches!(
        client.subscribe(empty, 100, |_| {}).await,
        Err(ClientError::InvalidInput(_))
    ));
    assert!(matches!(
        client.subscribe(&["bad@@name"], 100, |_| {}).await,
        Err(ClientError::InvalidInput(_))
    ));
    assert!(conn.try_recv(Duration::from_millis(200)).await.is_none());
    assert_eq!(client.subscription_count(), 0);
}

#[tokio::test]
async fn test_rejected_subscription_is_not_kept() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        conn.reply_flag(&request, 5, b"").await;
        conn
    });

    assert!(matches!(
        client.subscribe(&["t1"], 100, |_| {}).await,
        Err(ClientError::Server { flag: 5, .. })
    ));
    assert_eq!(client.subscription_count(), 0);
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let server_side = tokio::spawn(async move {
        conn.accept_registration().await;
        conn.accept_registration().await;
        conn
    });
    let first = client
        .subscribe(&["t1"], 100, move |values| {
            let _ = tx.send(values);
        })
        .await
        .unwrap();
    let second = client.subscribe(&["t2", "t3"], 250, |_| {}).await.unwrap();
    let conn = server_side.await.unwrap();

    drop(conn);
    let mut conn = server.accept().await;

    // both registrations come back with their original batch ids
    let replay_a = conn.accept_registration().await;
    let replay_b = conn.accept_registration().await;
    assert_eq!(replay_a.header.batch_id(), first);
    assert_eq!(replay_a.header.interval_ms(), 100);
    assert_eq!(replay_a.text(), "t1@@");
    assert_eq!(replay_b.header.batch_id(), second);
    assert_eq!(replay_b.header.interval_ms(), 250);
    assert_eq!(replay_b.text(), "t2@@t3@@");

    client.wait_connected(Duration::from_secs(2)).await.unwrap();
    assert_eq!(client.subscription_count(), 2);

    conn.push(first, 0, b"t1@@after@@").await;
    assert_eq!(next_push(&mut rx).await, tag_map(&[("t1", "after")]));
}

#[tokio::test]
async fn test_requests_fail_fast_while_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = dataservice_client::Client::builder()
        .port(port)
        .timeout_ms(500)
        .reconnect_delay(Duration::from_millis(50))
        .start()
        .await
        .unwrap();
    assert_ne!(client.connection_state(), ConnectionState::Connected);

    let started = std::time::Instant::now();
    let err = client.read_data(&["t1"]).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(err.code(), 1002);
    assert!(started.elapsed() < Duration::from_millis(200));
    client.shutdown().await;
}

#[tokio::test]
async fn test_object_queries() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let attrs = vec![
        ObjectAttr {
            name: "temp".to_string(),
            alias: "Temperature".to_string(),
            attr_type: AttrType::Float,
            len: 4,
        },
        ObjectAttr {
            name: "state".to_string(),
            alias: String::new(),
            attr_type: AttrType::String,
            len: 32,
        },
    ];
    let records: Vec<u8> = attrs.iter().flat_map(|a| a.encode()).collect();

    let server_side = tokio::spawn(async move {
        let request = conn.recv().await;
        assert_eq!(request.request_type(), RequestType::ReadAttr);
        assert_eq!(request.text(), "boiler1");
        conn.reply(&request, &records).await;

        let request = conn.recv().await;
        assert_eq!(request.request_type(), RequestType::ReadAttrData);
        assert_eq!(request.text(), "boiler1");
        conn.reply(&request, b"temp@@81.5@@state@@running@@").await;
        conn
    });

    assert_eq!(client.read_object_attr("boiler1").await.unwrap(), attrs);
    assert_eq!(
        client.read_object_data("boiler1").await.unwrap(),
        vec![
            ObjectData {
                name: "temp".to_string(),
                value: "81.5".to_string()
            },
            ObjectData {
                name: "state".to_string(),
                value: "running".to_string()
            },
        ]
    );
    server_side.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_fails_outstanding_requests() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;
    let client = std::sync::Arc::new(client);

    let reader = {
        let client = client.clone();
        tokio::spawn(async move { client.read_data(&["t1"]).await })
    };
    conn.recv().await;

    client.shutdown().await;
    assert!(matches!(
        reader.await.unwrap(),
        Err(ClientError::Shutdown)
    ));
    assert!(matches!(
        client.read_data(&["t1"]).await,
        Err(ClientError::Shutdown)
    ));
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_dropping_client_does_not_block_runtime() {
    let mut server = MockServer::start().await;
    let client = server.client_builder().worker_threads(1).start().await.unwrap();
    let mut conn = server.accept().await;
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();

    let server_side = tokio::spawn(async move {
        conn.accept_registration().await;
        conn
    });
    let batch_id = client
        .subscribe(&["t1"], 100, move |_| {
            let _ = started_tx.send(());
            std::thread::sleep(Duration::from_millis(300));
        })
        .await
        .unwrap();
    let mut conn = server_side.await.unwrap();

    for _ in 0..6 {
        conn.push(batch_id, 0, b"t1@@v@@").await;
    }
    tokio::time::timeout(Duration::from_secs(2), started_rx.recv())
        .await
        .unwrap();
    // let the remaining pushes reach the queue
    tokio::time::sleep(Duration::from_millis(50)).await;

    drop(client);
    let started = std::time::Instant::now();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(started.elapsed() < Duration::from_millis(400));
}

#[tokio::test]
async fn test_interrupted_replay_is_not_repeated() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;

    let server_side = tokio::spawn(async move {
        conn.accept_registration().await;
        conn.accept_registration().await;
        conn
    });
    let first = client.subscribe(&["t1"], 100, |_| {}).await.unwrap();
    let second = client.subscribe(&["t2"], 100, |_| {}).await.unwrap();
    drop(server_side.await.unwrap());

    // the socket dies while the first replayed registration is unanswered
    let mut conn = server.accept().await;
    assert_eq!(conn.recv().await.header.batch_id(), first);
    drop(conn);

    let mut conn = server.accept().await;
    assert_eq!(conn.accept_registration().await.header.batch_id(), first);
    assert_eq!(conn.accept_registration().await.header.batch_id(), second);
    client.wait_connected(Duration::from_secs(2)).await.unwrap();

    // an abandoned replay would send `second` again once its request timed out
    assert!(conn.try_recv(Duration::from_millis(800)).await.is_none());
}

#[tokio::test]
async fn test_subscription_confirmed_by_replay_stays_live() {
    let mut server = MockServer::start().await;
    let (client, mut conn) = server.connect().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let server = &mut server;
    let server_side = async move {
        // the first registration is never answered, the socket drops instead
        let request = conn.recv().await;
        drop(conn);
        let mut conn = server.accept().await;
        let replay = conn.accept_registration().await;
        assert_eq!(replay.header.batch_id(), request.header.batch_id());
        conn
    };

    let (subscribed, mut conn) = tokio::join!(
        client.subscribe(&["t1"], 100, move |values| {
            let _ = tx.send(values);
        }),
        server_side
    );
    let batch_id = subscribed.unwrap();
    assert_eq!(client.subscription_count(), 1);

    conn.push(batch_id, 0, b"t1@@live@@").await;
    assert_eq!(next_push(&mut rx).await, tag_map(&[("t1", "live")]));
}
