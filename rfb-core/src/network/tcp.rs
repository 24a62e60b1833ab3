use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{BytesCodec, Framed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RfbError;
use crate::transport::{Transport, TransportEvent};

/// Port used when the address does not name one.
pub const DEFAULT_PORT: u16 = 5900;

/// Turn `host`, `host:port`, `vnc://host:port` or `tcp://host:port` into
/// a socket address string.
pub fn parse_address(url: &str) -> Result<String, RfbError> {
    let rest = url
        .strip_prefix("vnc://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');
    if rest.is_empty() {
        return Err(RfbError::InvalidArgument(format!("no host in address {url:?}")));
    }

    // [v6]:port
    if let Some(v6) = rest.strip_prefix('[') {
        let Some((host, tail)) = v6.split_once(']') else {
            return Err(RfbError::InvalidArgument(format!("unterminated IPv6 address {url:?}")));
        };
        let port = match tail.strip_prefix(':') {
            Some(port) => parse_port(port, url)?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return Err(RfbError::InvalidArgument(format!("bad address {url:?}"))),
        };
        return Ok(format!("[{host}]:{port}"));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            Ok(format!("{host}:{}", parse_port(port, url)?))
        }
        // bare IPv6
        Some(_) => Ok(format!("[{rest}]:{DEFAULT_PORT}")),
        None => Ok(format!("{rest}:{DEFAULT_PORT}")),
    }
}

fn parse_port(port: &str, url: &str) -> Result<u16, RfbError> {
    port.parse()
        .map_err(|_| RfbError::InvalidArgument(format!("bad port in address {url:?}")))
}

/// A [`Transport`] over a plain TCP socket.
///
/// `open` spawns a background task on the current tokio runtime; the task
/// reports [`TransportEvent`]s on the receiver returned by [`TcpTransport::new`].
/// Writes are queued to the task and sent in order.
#[derive(Debug)]
pub struct TcpTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    writer: Option<mpsc::UnboundedSender<Bytes>>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let transport = Self {
            events,
            writer: None,
            cancel: CancellationToken::new(),
            open: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }
}

impl Transport for TcpTransport {
    fn open(&mut self, url: &str) -> Result<(), RfbError> {
        if self.writer.is_some() {
            return Err(RfbError::InvalidState("transport already opened".into()));
        }
        let addr = parse_address(url)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RfbError::Other(format!("no tokio runtime: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.writer = Some(tx);
        runtime.spawn(run(
            addr,
            rx,
            self.events.clone(),
            self.cancel.clone(),
            self.open.clone(),
        ));
        Ok(())
    }

    fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if self.writer.is_none() {
            // Nothing was ever started, so nobody else will report it.
            let _ = self.events.send(TransportEvent::Close {
                code: None,
                reason: String::new(),
            });
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), RfbError> {
        if self.cancel.is_cancelled() {
            return Err(RfbError::TransportClosed);
        }
        let Some(writer) = &self.writer else {
            return Err(RfbError::TransportClosed);
        };
        writer
            .send(Bytes::copy_from_slice(data))
            .map_err(|_| RfbError::TransportClosed)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.cancel.is_cancelled()
    }
}

/// Connection task: connect, then pump bytes both ways until the peer
/// closes, an error occurs or the transport is closed locally.
async fn run(
    addr: String,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
) {
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            let _ = events.send(TransportEvent::Close {
                code: None,
                reason: "closed while connecting".into(),
            });
            return;
        }
        result = TcpStream::connect(&addr) => result,
    };
    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%addr, error = %e, "connect failed");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Close {
                code: None,
                reason: e.to_string(),
            });
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not disable Nagle");
    }
    debug!(%addr, "connected");
    open.store(true, Ordering::Release);
    let _ = events.send(TransportEvent::Open);

    let (mut net_writer, mut net_reader) = Framed::new(stream, BytesCodec::new()).split();

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Writes queued before the close still go out.
                while let Ok(data) = outbound.try_recv() {
                    if net_writer.feed(data).await.is_err() {
                        break;
                    }
                }
                break String::new();
            }
            data = outbound.recv() => match data {
                Some(data) => {
                    if let Err(e) = net_writer.send(data).await {
                        warn!(error = %e, "network write error");
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break e.to_string();
                    }
                }
                None => break String::new(),
            },
            frame = net_reader.next() => match frame {
                Some(Ok(buf)) => {
                    if events.send(TransportEvent::Message(buf.freeze())).is_err() {
                        // Nobody is listening any more.
                        break String::new();
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "network read error");
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break e.to_string();
                }
                None => break "connection closed by peer".into(),
            },
        }
    };

    open.store(false, Ordering::Release);
    if let Err(e) = net_writer.close().await {
        debug!(error = %e, "error closing socket");
    }
    debug!(%addr, %reason, "transport closed");
    let _ = events.send(TransportEvent::Close { code: None, reason });
}
