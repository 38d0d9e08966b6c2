use anyhow::Result;
use daemon_client::{Modem, ModemError};
use daemon_wire::{Method, RequestDescriptor, ResponseMessage, WireError};
use fake_daemon::RawDaemon;
use std::time::Duration;
use tokio::sync::mpsc;

fn canned_replies() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none");
    bytes.extend_from_slice(
        b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\ntw\r\n1\r\no\r\n0\r\n\r\n",
    );
    bytes.extend_from_slice(
        b"HTTP/1.1 404 Not Found\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\nthree",
    );
    bytes
}

fn ping(n: usize) -> RequestDescriptor {
    RequestDescriptor::new(Method::Get, format!("/v1.43/_ping?n={n}"))
}

async fn wait_until_dead(modem: &Modem) {
    for _ in 0..200 {
        if !modem.is_connected() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("connection never reported dead");
}

#[tokio::test]
async fn test_callbacks_fire_in_send_order_for_any_chunking() -> Result<()> {
    for chunk in [1, 2, 3, 7, 16, 64, 4096] {
        let daemon = RawDaemon::spawn(3, canned_replies(), chunk, false).await?;
        let modem = Modem::open(daemon.socket_path()).await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<ResponseMessage, ModemError>)>();

        for n in 1..=3 {
            let tx = tx.clone();
            modem
                .send(
                    &ping(n),
                    Box::new(move |result| {
                        let _ = tx.send((n, result));
                    }),
                )
                .await?;
        }
        assert_eq!(modem.in_flight(), 3);

        let mut seen = Vec::new();
        for _ in 0..3 {
            let (n, result) = rx.recv().await.expect("callback");
            let message = result?;
            seen.push((n, message.status(), message.body_text().into_owned()));
        }

        assert_eq!(
            seen,
            vec![
                (1, 200, "one".to_string()),
                (2, 200, "two".to_string()),
                (3, 404, "three".to_string()),
            ],
            "chunk size {chunk}"
        );
        assert_eq!(modem.in_flight(), 0);
        assert_eq!(
            daemon.received(),
            vec![
                "GET /v1.43/_ping?n=1",
                "GET /v1.43/_ping?n=2",
                "GET /v1.43/_ping?n=3"
            ]
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_unsolicited_response_discards_connection() -> Result<()> {
    let daemon = RawDaemon::spawn(1, canned_replies(), 5, false).await?;
    let modem = Modem::open(daemon.socket_path()).await?;

    let first = modem.request(&ping(1)).await?;
    assert_eq!(first.body(), b"one");

    wait_until_dead(&modem).await;
    let err = modem.request(&ping(2)).await.unwrap_err();
    assert!(matches!(err, ModemError::Closed), "got {err:?}");
    Ok(())
}

#[tokio::test]
async fn test_protocol_error_fails_every_pending_request() -> Result<()> {
    let reply = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 2\r\n\r\n\x1f\x8b".to_vec();
    let daemon = RawDaemon::spawn(2, reply, 4, false).await?;
    let modem = Modem::open(daemon.socket_path()).await?;

    let first_req = ping(1);
    let (first, second) = tokio::join!(modem.request(&first_req), async {
        // Give the first request a head start so both are queued in order.
        tokio::time::sleep(Duration::from_millis(10)).await;
        modem.request(&ping(2)).await
    });

    for result in [first, second] {
        match result {
            Err(ModemError::Protocol(WireError::UnsupportedCoding { coding })) => {
                assert_eq!(coding, "gzip")
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }
    assert!(!modem.is_connected());
    Ok(())
}

#[tokio::test]
async fn test_daemon_hangup_fails_waiting_request() -> Result<()> {
    let daemon = RawDaemon::spawn(1, Vec::new(), 1, true).await?;
    let modem = Modem::open(daemon.socket_path()).await?;

    let err = modem.request(&ping(1)).await.unwrap_err();
    assert!(matches!(err, ModemError::Closed));
    Ok(())
}

#[tokio::test]
async fn test_connect_and_disconnect_misuse() -> Result<()> {
    let daemon = RawDaemon::spawn(1, canned_replies(), 4096, false).await?;
    let mut modem = Modem::open(daemon.socket_path()).await?;

    assert!(matches!(
        modem.connect().await,
        Err(ModemError::AlreadyConnected)
    ));

    modem.disconnect().await?;
    assert!(!modem.is_connected());
    assert!(matches!(
        modem.disconnect().await,
        Err(ModemError::NotConnected)
    ));
    assert!(matches!(
        modem.request(&ping(1)).await,
        Err(ModemError::NotConnected)
    ));
    Ok(())
}
