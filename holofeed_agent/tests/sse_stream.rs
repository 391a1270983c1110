//! End-to-end checks against a running server on an ephemeral loopback port.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use holofeed_agent::{AgentConfig, MetricSnapshot, Server, SnapshotSource};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const READ_DEADLINE: Duration = Duration::from_secs(5);

struct FixedSource(MetricSnapshot);

impl SnapshotSource for FixedSource {
    fn sample(&mut self) -> MetricSnapshot {
        self.0.clone()
    }
}

fn test_config(interval: Duration) -> AgentConfig {
    AgentConfig {
        bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port: 0,
        interval,
        write_timeout: Duration::from_millis(500),
        shutdown_grace: Duration::from_secs(2),
        ..AgentConfig::default()
    }
}

fn scenario_snapshot() -> MetricSnapshot {
    MetricSnapshot {
        ram_usage_percent: 42.0,
        net_upload_kbps: 1.5,
        ..MetricSnapshot::default()
    }
}

async fn start(interval: Duration) -> Server {
    Server::start_with(&test_config(interval), FixedSource(scenario_snapshot()))
        .await
        .expect("server starts on an ephemeral port")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>, deadline: Instant) {
    let mut chunk = [0u8; 1024];
    let left = deadline.saturating_duration_since(Instant::now());
    let n = timeout(left, stream.read(&mut chunk))
        .await
        .expect("data before deadline")
        .expect("read");
    assert!(n > 0, "connection closed early; got {:?}", String::from_utf8_lossy(buf));
    buf.extend_from_slice(&chunk[..n]);
}

/// A subscribed connection: the response head plus a decoder for the chunked body.
struct Subscriber {
    stream: TcpStream,
    head: String,
    raw: Vec<u8>,
    body: Vec<u8>,
}

impl Subscriber {
    async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /sse HTTP/1.1\r\nHost: cube\r\nAccept: text/event-stream\r\n\r\n")
            .await
            .unwrap();
        let deadline = Instant::now() + READ_DEADLINE;
        let mut raw = Vec::new();
        while find(&raw, b"\r\n\r\n").is_none() {
            read_more(&mut stream, &mut raw, deadline).await;
        }
        let head_end = find(&raw, b"\r\n\r\n").unwrap() + 4;
        let head = String::from_utf8(raw[..head_end].to_vec()).unwrap();
        let raw = raw.split_off(head_end);
        Self {
            stream,
            head,
            raw,
            body: Vec::new(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (k, v) = line.split_once(':')?;
            k.eq_ignore_ascii_case(name).then(|| v.trim())
        })
    }

    // Moves every complete chunk from `raw` into `body`.
    fn decode_chunks(&mut self) {
        while let Some(line_end) = find(&self.raw, b"\r\n") {
            let size_line = String::from_utf8_lossy(&self.raw[..line_end]).to_string();
            let size = usize::from_str_radix(size_line.split(';').next().unwrap().trim(), 16)
                .expect("chunk size");
            let total = line_end + 2 + size + 2;
            if self.raw.len() < total {
                return;
            }
            self.body
                .extend_from_slice(&self.raw[line_end + 2..line_end + 2 + size]);
            self.raw.drain(..total);
        }
    }

    /// Returns the next complete event from the body.
    async fn next_event(&mut self) -> String {
        let deadline = Instant::now() + READ_DEADLINE;
        loop {
            self.decode_chunks();
            if let Some(end) = find(&self.body, b"\n\n") {
                let event: Vec<u8> = self.body.drain(..end + 2).collect();
                return String::from_utf8(event).expect("utf-8 event");
            }
            read_more(&mut self.stream, &mut self.raw, deadline).await;
        }
    }
}

async fn wait_for_clients(server: &Server, n: usize) {
    let deadline = Instant::now() + READ_DEADLINE;
    while server.registry().len() != n {
        assert!(
            Instant::now() < deadline,
            "expected {n} clients, have {}",
            server.registry().len()
        );
        sleep(Duration::from_millis(10)).await;
    }
}

async fn request_to_end(addr: SocketAddr, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut all = Vec::new();
    timeout(READ_DEADLINE, stream.read_to_end(&mut all))
        .await
        .expect("server closes the connection")
        .unwrap();
    String::from_utf8(all).unwrap()
}

fn has_header(response: &str, name: &str, value: &str) -> bool {
    let head = response.split("\r\n\r\n").next().unwrap_or_default();
    head.lines().skip(1).any(|line| {
        line.split_once(':')
            .is_some_and(|(k, v)| k.eq_ignore_ascii_case(name) && v.trim() == value)
    })
}

#[tokio::test]
async fn subscriber_receives_event_block() {
    let server = start(Duration::from_millis(100)).await;
    let mut sub = Subscriber::connect(server.local_addr()).await;

    assert!(sub.head.starts_with("HTTP/1.1 200 OK\r\n"), "{}", sub.head);
    assert_eq!(sub.header("content-type"), Some("text/event-stream"));
    assert_eq!(sub.header("cache-control"), Some("no-cache"));
    assert_eq!(sub.header("connection"), Some("keep-alive"));
    assert_eq!(sub.header("access-control-allow-origin"), Some("*"));

    let event = sub.next_event().await;
    assert_eq!(event, scenario_snapshot().to_event());
    assert!(event.contains("RAM usage 42.0%\n"));
    assert!(event.contains("NET upload speed 1.5KB/s\n"));
    assert!(event.contains("CPU usage 0.0%\n"));
    assert!(event.contains("GPU temp 0.0C\n"));
    assert!(event.starts_with("data: CPU usage"));

    // The stream keeps going, one event per tick.
    assert_eq!(sub.next_event().await, scenario_snapshot().to_event());

    server.stop().await;
}

#[tokio::test]
async fn query_string_still_subscribes() {
    let server = start(Duration::from_millis(100)).await;
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /sse?display=cube HTTP/1.1\r\nHost: cube\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    read_more(&mut stream, &mut raw, Instant::now() + READ_DEADLINE).await;
    assert!(raw.starts_with(b"HTTP/1.1 200 OK\r\n"));
    wait_for_clients(&server, 1).await;
    server.stop().await;
}

#[tokio::test]
async fn other_paths_get_not_found_and_close() {
    let server = start(Duration::from_millis(100)).await;
    let text = request_to_end(server.local_addr(), b"GET /other HTTP/1.1\r\nHost: cube\r\n\r\n").await;

    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");
    assert!(has_header(&text, "content-type", "text/plain"), "{text}");
    assert!(has_header(&text, "content-length", "9"), "{text}");
    assert!(has_header(&text, "connection", "close"), "{text}");
    assert!(text.ends_with("\r\n\r\nNot Found"));
    assert!(server.registry().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let server = start(Duration::from_millis(100)).await;
    let text = request_to_end(server.local_addr(), b"POST /sse HTTP/1.1\r\nHost: cube\r\nContent-Length: 0\r\n\r\n").await;
    assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"), "{text}");
    assert!(text.ends_with("Not Found"));
    assert!(server.registry().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn closed_subscriber_is_removed_without_disturbing_others() {
    let server = start(Duration::from_millis(50)).await;
    let mut keeper = Subscriber::connect(server.local_addr()).await;
    let leaver = Subscriber::connect(server.local_addr()).await;
    wait_for_clients(&server, 2).await;

    drop(leaver);
    // Writes to the closed socket fail within a couple of ticks.
    wait_for_clients(&server, 1).await;

    for _ in 0..3 {
        assert_eq!(keeper.next_event().await, scenario_snapshot().to_event());
    }

    server.stop().await;
}

#[tokio::test]
async fn stop_closes_subscribers_and_listener() {
    let server = start(Duration::from_millis(50)).await;
    let addr = server.local_addr();
    let mut sub = Subscriber::connect(addr).await;
    wait_for_clients(&server, 1).await;

    server.stop().await;

    // Drain whatever events were in flight; the stream must then end.
    let mut sink = Vec::new();
    timeout(READ_DEADLINE, sub.stream.read_to_end(&mut sink))
        .await
        .expect("subscriber sees EOF after stop")
        .ok();

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn bind_conflict_fails_fast() {
    let server = start(Duration::from_millis(100)).await;
    let taken = AgentConfig {
        port: server.local_addr().port(),
        ..test_config(Duration::from_millis(100))
    };
    let err = Server::start_with(&taken, FixedSource(MetricSnapshot::default()))
        .await
        .err()
        .expect("second bind on the same port fails");
    assert!(err.to_string().contains("failed to bind"));
    server.stop().await;
}
