//! Scripted RESP peer for integration tests.
//!
//! The peer runs on its own thread with a current-thread tokio runtime and
//! answers each received command with whatever the handler returns. `None`
//! leaves the command unanswered so the client's read deadline fires, unless
//! the peer was started with `spawn_closing_server`, which hangs up instead.

#![allow(dead_code)]

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use hkv_pipeline::{ClientConfig, KVClient};

/// Handle to a running scripted peer.
pub struct Peer {
    pub addr: String,
    accepted: Arc<AtomicUsize>,
}

impl Peer {
    /// Number of TCP connections the peer has accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

/// Starts a peer that serves `expected` commands in total across connections.
pub fn spawn_server<H>(expected: usize, handler: H) -> Peer
where
    H: Fn(usize, &[Vec<u8>]) -> Option<Vec<u8>> + Send + 'static,
{
    spawn_peer(expected, true, handler)
}

/// Like `spawn_server`, but closes the socket as soon as the last expected
/// command has been read, so unanswered commands see EOF.
pub fn spawn_closing_server<H>(expected: usize, handler: H) -> Peer
where
    H: Fn(usize, &[Vec<u8>]) -> Option<Vec<u8>> + Send + 'static,
{
    spawn_peer(expected, false, handler)
}

fn spawn_peer<H>(expected: usize, hold_open: bool, handler: H) -> Peer
where
    H: Fn(usize, &[Vec<u8>]) -> Option<Vec<u8>> + Send + 'static,
{
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    listener.set_nonblocking(true).expect("nonblocking");
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        runtime.block_on(async move {
            let listener = TcpListener::from_std(listener).expect("listener");
            let mut served = 0;
            while served < expected {
                let (stream, _) = listener.accept().await.expect("accept");
                counter.fetch_add(1, Ordering::SeqCst);
                serve(stream, expected, hold_open, &mut served, &handler).await;
            }
        });
    });

    Peer { addr, accepted }
}

async fn serve<H>(mut stream: TcpStream, expected: usize, hold_open: bool, served: &mut usize, handler: &H)
where
    H: Fn(usize, &[Vec<u8>]) -> Option<Vec<u8>>,
{
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    loop {
        while let Some(args) = parse_command(&mut buffer) {
            if let Some(reply) = handler(*served, &args) {
                stream.write_all(&reply).await.expect("write reply");
            }
            *served += 1;
        }
        if *served >= expected {
            break;
        }
        match stream.read_buf(&mut buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
    if hold_open {
        // Unanswered commands time out instead of seeing EOF.
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

fn parse_command(buf: &mut BytesMut) -> Option<Vec<Vec<u8>>> {
    let mut pos = 0;
    let count = read_header(buf, &mut pos, b'*')?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_header(buf, &mut pos, b'$')?;
        if buf.len() < pos + len + 2 {
            return None;
        }
        args.push(buf[pos..pos + len].to_vec());
        pos += len + 2;
    }
    buf.advance(pos);
    Some(args)
}

fn read_header(buf: &[u8], pos: &mut usize, prefix: u8) -> Option<usize> {
    let rest = &buf[*pos..];
    let end = rest.windows(2).position(|window| window == b"\r\n")?;
    assert_eq!(rest.first(), Some(&prefix), "unexpected RESP frame");
    let value = std::str::from_utf8(&rest[1..end]).ok()?.parse().ok()?;
    *pos += end + 2;
    Some(value)
}

pub fn simple(message: &str) -> Option<Vec<u8>> {
    Some(format!("+{message}\r\n").into_bytes())
}

pub fn error(message: &str) -> Option<Vec<u8>> {
    Some(format!("-{message}\r\n").into_bytes())
}

pub fn integer(value: i64) -> Option<Vec<u8>> {
    Some(format!(":{value}\r\n").into_bytes())
}

pub fn bulk(data: &[u8]) -> Option<Vec<u8>> {
    let mut buf = format!("${}\r\n", data.len()).into_bytes();
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
    Some(buf)
}

pub fn null() -> Option<Vec<u8>> {
    Some(b"$-1\r\n".to_vec())
}

pub fn client_config(addr: &str) -> ClientConfig {
    ClientConfig {
        addr: addr.to_string(),
        max_idle: 1,
        max_total: 1,
        read_timeout: Some(Duration::from_millis(200)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    }
}

pub fn client_with_addr(addr: &str) -> KVClient {
    init_tracing();
    KVClient::with_config(client_config(addr)).expect("client")
}

/// Routes library logs to the test harness; set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
