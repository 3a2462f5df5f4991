//! fred handle lifecycle tests
//!
//! Uses a minimal in-process RESP server whose replies can be held back, so
//! a handshake can be caught in flight without a real broker.

mod common;

use beeq::connection::{Backend, Connector, FredConnector};
use beeq::ConnectionSettings;
use common::init_tracing;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Parse one RESP array command from the front of `buf`
fn parse_command(buf: &[u8]) -> Option<(Vec<String>, usize)> {
    fn line(buf: &[u8], from: usize) -> Option<(&[u8], usize)> {
        let end = buf[from..].windows(2).position(|w| w == b"\r\n")? + from;
        Some((&buf[from..end], end + 2))
    }

    let (header, mut pos) = line(buf, 0)?;
    let count: usize = std::str::from_utf8(header.strip_prefix(b"*")?).ok()?.parse().ok()?;

    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let (len, next) = line(buf, pos)?;
        let len: usize = std::str::from_utf8(len.strip_prefix(b"$")?).ok()?.parse().ok()?;
        if buf.len() < next + len + 2 {
            return None;
        }
        args.push(String::from_utf8_lossy(&buf[next..next + len]).into_owned());
        pos = next + len + 2;
    }
    Some((args, pos))
}

/// Serve one client, holding the first reply back by `hold`
///
/// Reports through `closed` once the client hangs up or sends `QUIT`.
async fn serve(mut stream: TcpStream, hold: Duration, closed: oneshot::Sender<()>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let mut first = true;

    loop {
        while let Some((args, used)) = parse_command(&buf) {
            buf.drain(..used);
            if first {
                tokio::time::sleep(hold).await;
                first = false;
            }

            let name = args.first().map(|a| a.to_ascii_uppercase()).unwrap_or_default();
            let reply: &[u8] = match name.as_str() {
                "PING" => b"+PONG\r\n",
                "CLIENT" => b":1\r\n",
                "QUIT" => {
                    let _ = stream.write_all(b"+OK\r\n").await;
                    let _ = closed.send(());
                    return;
                }
                _ => b"+OK\r\n",
            };
            if stream.write_all(reply).await.is_err() {
                let _ = closed.send(());
                return;
            }
        }

        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => {
                let _ = closed.send(());
                return;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

async fn stub_server(hold: Duration) -> (u16, oneshot::Receiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            serve(stream, hold, tx).await;
        }
    });

    (port, rx)
}

#[test]
fn test_parse_command() {
    let (args, used) = parse_command(b"*2\r\n$4\r\nPING\r\n$2\r\nhi\r\n*1").unwrap();
    assert_eq!(args, vec!["PING", "hi"]);
    assert_eq!(used, 22);
    assert!(parse_command(b"*1\r\n$4\r\nPI").is_none());
}

#[tokio::test]
async fn test_disconnect_while_connecting_closes_socket() {
    init_tracing();
    let (port, closed) = stub_server(Duration::from_millis(300)).await;
    let settings = ConnectionSettings::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(2));

    let handle = FredConnector.open(settings).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_ready());

    handle.disconnect().await;
    assert!(handle.link().is_closed());

    let hung_up = tokio::time::timeout(Duration::from_secs(1), closed).await;
    assert!(
        matches!(hung_up, Ok(Ok(()))),
        "socket left open after disconnecting a connecting handle"
    );
    assert!(!handle.is_ready());
}

#[tokio::test]
async fn test_disconnect_after_ready_closes_socket() {
    init_tracing();
    let (port, closed) = stub_server(Duration::ZERO).await;
    let settings = ConnectionSettings::new()
        .with_host("127.0.0.1")
        .with_port(port)
        .with_connect_timeout(Duration::from_secs(2));

    let handle = FredConnector.open(settings).unwrap();
    handle.wait_ready().await.unwrap();

    handle.disconnect().await;
    let hung_up = tokio::time::timeout(Duration::from_secs(1), closed).await;
    assert!(matches!(hung_up, Ok(Ok(()))));
}
