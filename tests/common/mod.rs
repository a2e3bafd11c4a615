//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use traffic_capture::config::ProxyConfig;
use traffic_capture::{HttpServer, Shutdown, TraceStore, TraceWriter};

/// Start a mock upstream that returns a fixed 200 response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    start_programmable_backend(move |_body| async move { (200, response.to_string()) }).await
}

/// Start a mock upstream whose response is computed from the request body.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let body = read_request_body(&mut socket).await;
                        let (status, body) = f(body).await;
                        let status_text = match status {
                            200 => "200 OK",
                            201 => "201 Created",
                            404 => "404 Not Found",
                            500 => "500 Internal Server Error",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Read one request and return its body (Content-Length framing only).
async fn read_request_body(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return Vec::new(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
    let content_length = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    buf[header_end..].to_vec()
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A proxy running in the background of a test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub store: Arc<TraceStore>,
    pub shutdown: Shutdown,
    pub server: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and wait for every queued trace to be written.
    pub async fn stop(self) -> Arc<TraceStore> {
        self.shutdown.trigger();
        let _ = self.server.await;
        let _ = self.writer.await;
        self.store
    }
}

/// Start a proxy in front of `upstream` with an in-memory store.
pub async fn start_proxy(upstream: SocketAddr, configure: impl FnOnce(&mut ProxyConfig)) -> TestProxy {
    let mut config = ProxyConfig::default();
    config.upstream.address = upstream.to_string();
    config.storage.mode = traffic_capture::config::StorageMode::InMemory;
    configure(&mut config);

    let store = Arc::new(TraceStore::from_config(&config.storage).unwrap());
    let (writer, writer_task) = TraceWriter::spawn(
        store.clone(),
        config.storage.queue_capacity,
        Duration::from_millis(config.storage.write_timeout_ms),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, store.clone(), writer).unwrap();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        server.run(listener, signal).await.unwrap();
    });

    TestProxy {
        addr,
        store,
        shutdown,
        server,
        writer: writer_task,
    }
}

/// Poll until `count` traces are stored or the deadline passes.
pub async fn wait_for_traces(store: &TraceStore, count: u64) {
    for _ in 0..200 {
        if store.count().unwrap() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {count} traces");
}
