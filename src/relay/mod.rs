//! Loopback relay that makes shoutcast/ICY streams consumable by a plain
//! HTTP decoder. The decoder asks for `http://127.0.0.1:<port>/<remote url>`.

pub mod icy;

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::error::RelayError;
use icy::{find_head_end, IcyMetadataStripper, ResponseHead, MAX_HEAD_BYTES};

/// Per-session protocol translation proxy.
///
/// Upstreams are spoken to in plain HTTP/1.0 over TCP, since ICY servers
/// answer with an `ICY 200 OK` status line that HTTP client libraries
/// reject. `https://` stations are therefore not relayed: the request is
/// answered with `502 Bad Gateway`. Such stations need a decoder with native
/// stream support.
#[async_trait]
pub trait StreamRelay: Send + Sync {
    /// Bind and start serving; returns the local port
    async fn start(&self) -> Result<u16, RelayError>;

    /// Stop serving and drop open connections. Safe to call repeatedly, and
    /// a `start` still in flight fails with [`RelayError::Stopped`].
    fn stop(&self);

    fn port(&self) -> Option<u16>;

    /// Local URL relaying `remote`
    fn local_url(&self, remote: &str) -> Option<String> {
        self.port()
            .map(|port| format!("http://127.0.0.1:{}/{}", port, remote))
    }
}

/// Creates one relay per playback session
pub trait RelayFactory: Send + Sync {
    fn create(&self) -> Arc<dyn StreamRelay>;
}

pub struct IcyRelayFactory {
    config: RelayConfig,
}

impl IcyRelayFactory {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }
}

impl RelayFactory for IcyRelayFactory {
    fn create(&self) -> Arc<dyn StreamRelay> {
        Arc::new(IcyRelay::new(self.config.clone()))
    }
}

#[derive(Default)]
struct RelayState {
    port: Option<u16>,
    shutdown: Option<watch::Sender<bool>>,
    accept_task: Option<JoinHandle<()>>,
    stop_count: u64,
}

pub struct IcyRelay {
    config: RelayConfig,
    state: Mutex<RelayState>,
    stream_title: Arc<Mutex<Option<String>>>,
}

impl IcyRelay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RelayState::default()),
            stream_title: Arc::new(Mutex::new(None)),
        }
    }

    fn state(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last `StreamTitle` announced by the upstream server
    pub fn stream_title(&self) -> Option<String> {
        self.stream_title
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl StreamRelay for IcyRelay {
    async fn start(&self) -> Result<u16, RelayError> {
        let stops_before = {
            let state = self.state();
            if let Some(port) = state.port {
                return Ok(port);
            }
            state.stop_count
        };

        let listener = TcpListener::bind((self.config.bind_address.as_str(), 0))
            .await
            .map_err(RelayError::Bind)?;
        let port = listener.local_addr().map_err(RelayError::Bind)?.port();

        let mut state = self.state();
        if state.stop_count != stops_before {
            return Err(RelayError::Stopped);
        }
        if let Some(port) = state.port {
            return Ok(port);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            shutdown_rx,
            self.config.clone(),
            Arc::clone(&self.stream_title),
        ));

        state.port = Some(port);
        state.shutdown = Some(shutdown_tx);
        state.accept_task = Some(accept_task);
        info!("Stream relay listening on {}:{}", self.config.bind_address, port);
        Ok(port)
    }

    fn stop(&self) {
        let mut state = self.state();
        state.stop_count += 1;
        if let Some(shutdown) = state.shutdown.take() {
            shutdown.send_replace(true);
        }
        if let Some(task) = state.accept_task.take() {
            task.abort();
        }
        if let Some(port) = state.port.take() {
            info!("Stream relay on port {} stopped", port);
        }
    }

    fn port(&self) -> Option<u16> {
        self.state().port
    }
}

impl Drop for IcyRelay {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    shutdown: watch::Receiver<bool>,
    config: RelayConfig,
    stream_title: Arc<Mutex<Option<String>>>,
) {
    let stopped = wait_for_shutdown(shutdown.clone());
    tokio::pin!(stopped);

    loop {
        tokio::select! {
            _ = &mut stopped => break,
            accepted = listener.accept() => match accepted {
                Ok((client, peer)) => {
                    debug!("Relay connection from {}", peer);
                    let shutdown = shutdown.clone();
                    let config = config.clone();
                    let stream_title = Arc::clone(&stream_title);
                    tokio::spawn(async move {
                        tokio::select! {
                            result = serve_client(client, &config, &stream_title) => {
                                if let Err(e) = result {
                                    warn!("Relay connection ended: {}", e);
                                }
                            }
                            _ = wait_for_shutdown(shutdown) => {}
                        }
                    });
                }
                Err(e) => {
                    warn!("Relay accept failed: {}", e);
                    break;
                }
            }
        }
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Upstream named by a relay request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
    pub path: String,
}

impl UpstreamTarget {
    /// Parse the request target `/http://host[:port]/path`. `https` targets
    /// are refused with [`RelayError::UnsupportedScheme`].
    pub fn from_request_path(target: &str) -> Result<Self, RelayError> {
        let url = target.trim_start_matches('/');
        if url.starts_with("https://") {
            return Err(RelayError::UnsupportedScheme("https".to_string()));
        }
        let rest = url
            .strip_prefix("http://")
            .ok_or_else(|| RelayError::InvalidRequest(format!("not an http url: {}", target)))?;

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if authority.is_empty() {
            return Err(RelayError::InvalidRequest(format!("missing host: {}", target)));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| RelayError::InvalidRequest(format!("bad port in {}", target)))?;
                (host, port)
            }
            None => (authority, 80),
        };

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    fn request(&self) -> String {
        format!(
            "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: storycast/{}\r\nAccept: */*\r\nIcy-MetaData: 1\r\nConnection: close\r\n\r\n",
            self.path,
            self.host,
            env!("CARGO_PKG_VERSION")
        )
    }
}

async fn read_head(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Result<usize, RelayError> {
    let mut chunk = [0u8; 2048];
    loop {
        if let Some(end) = find_head_end(buf) {
            return Ok(end);
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RelayError::InvalidRequest("head too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(RelayError::InvalidRequest("connection closed before head".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn serve_client(
    mut client: TcpStream,
    config: &RelayConfig,
    stream_title: &Mutex<Option<String>>,
) -> Result<(), RelayError> {
    let mut request = Vec::new();
    let head_end = read_head(&mut client, &mut request).await?;
    let head = String::from_utf8_lossy(&request[..head_end]);
    let target = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or_default()
        .to_string();

    let mut upstream = match connect_upstream(&target, config).await {
        Ok(upstream) => upstream,
        Err(e) => {
            let _ = client
                .write_all(b"HTTP/1.0 502 Bad Gateway\r\nContent-Length: 0\r\n\r\n")
                .await;
            return Err(e);
        }
    };

    let mut response = Vec::new();
    let body_start = read_head(&mut upstream, &mut response).await?;
    let head = ResponseHead::parse(&response[..body_start])?;
    client.write_all(head.translated().as_bytes()).await?;

    let mut stripper = head.metaint().map(IcyMetadataStripper::new);
    let mut out = Vec::with_capacity(config.read_buffer_bytes);
    let mut forward = |data: &[u8], out: &mut Vec<u8>| match stripper.as_mut() {
        Some(stripper) => {
            stripper.feed(data, out);
            if let Some(title) = stripper.take_title_change() {
                info!("Stream title: {}", title);
                *stream_title.lock().unwrap_or_else(|p| p.into_inner()) = Some(title);
            }
        }
        None => out.extend_from_slice(data),
    };

    forward(&response[body_start..], &mut out);
    client.write_all(&out).await?;

    let mut buf = vec![0u8; config.read_buffer_bytes.max(1024)];
    loop {
        let n = upstream.read(&mut buf).await?;
        if n == 0 {
            debug!("Upstream closed the stream");
            return Ok(());
        }
        out.clear();
        forward(&buf[..n], &mut out);
        client.write_all(&out).await?;
    }
}

async fn connect_upstream(target: &str, config: &RelayConfig) -> Result<TcpStream, RelayError> {
    let upstream = UpstreamTarget::from_request_path(target)?;
    let connect = TcpStream::connect((upstream.host.as_str(), upstream.port));
    let mut stream = tokio::time::timeout(config.connect_timeout(), connect)
        .await
        .map_err(|_| RelayError::Connect {
            host: upstream.host.clone(),
            reason: "timed out".to_string(),
        })?
        .map_err(|e| RelayError::Connect {
            host: upstream.host.clone(),
            reason: e.to_string(),
        })?;

    stream.write_all(upstream.request().as_bytes()).await?;
    debug!("Relaying {}:{}{}", upstream.host, upstream.port, upstream.path);
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_target_parsing() {
        let target = UpstreamTarget::from_request_path("/http://radio.example.org:8000/live").unwrap();
        assert_eq!(target.host, "radio.example.org");
        assert_eq!(target.port, 8000);
        assert_eq!(target.path, "/live");

        let target = UpstreamTarget::from_request_path("/http://x").unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/");
    }

    #[test]
    fn test_upstream_target_rejects_other_schemes() {
        assert!(matches!(
            UpstreamTarget::from_request_path("/https://secure/stream"),
            Err(RelayError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            UpstreamTarget::from_request_path("/ftp://x/stream"),
            Err(RelayError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_upstream_request_asks_for_metadata() {
        let target = UpstreamTarget::from_request_path("/http://x/stream").unwrap();
        let request = target.request();
        assert!(request.starts_with("GET /stream HTTP/1.0\r\n"));
        assert!(request.contains("Icy-MetaData: 1\r\n"));
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_releases_port() {
        let relay = IcyRelay::new(RelayConfig::default());
        assert!(relay.local_url("http://x/s").is_none());

        let port = relay.start().await.unwrap();
        assert_ne!(port, 0);
        assert_eq!(relay.start().await.unwrap(), port);
        assert_eq!(
            relay.local_url("http://x/s").unwrap(),
            format!("http://127.0.0.1:{}/http://x/s", port)
        );

        relay.stop();
        relay.stop();
        assert_eq!(relay.port(), None);
    }

    #[tokio::test]
    async fn test_https_request_gets_bad_gateway() {
        let relay = IcyRelay::new(RelayConfig::default());
        let port = relay.start().await.unwrap();

        let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        client
            .write_all(b"GET /https://secure/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.0 502"));

        relay.stop();
    }
}
