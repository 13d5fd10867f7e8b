//! STOMP 1.2 client over TCP.
//!
//! The write half of the connection is owned by [`StompClient`] and driven
//! directly by the worker. The read half runs in a background task that
//! routes MESSAGE frames to their [`Subscription`] by the `subscription`
//! header and completes pending RECEIPTs.

use super::{BrokerClient, Command, Connector, Frame, ServerAddress, StompCodec, Subscription};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

/// Connection settings for the STOMP transport
#[derive(Debug, Clone)]
pub struct StompConfig {
    /// Bound on TCP connect plus the CONNECT/CONNECTED handshake.
    pub connect_timeout: Duration,
    /// Bound on waiting for the RECEIPT that confirms a SUBSCRIBE.
    pub receipt_timeout: Duration,
    /// Socket send/receive buffer size. The OS default is kept when unset.
    pub buffer_size: Option<usize>,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            connect_timeout: crate::defaults::CONNECT_TIMEOUT,
            receipt_timeout: crate::defaults::RECEIPT_TIMEOUT,
            buffer_size: None,
        }
    }
}

/// Opens [`StompClient`] connections
#[derive(Debug, Clone, Default)]
pub struct StompConnector {
    config: StompConfig,
}

impl StompConnector {
    pub fn new(config: StompConfig) -> Self {
        Self { config }
    }
}

#[derive(Default)]
struct Routes {
    subscriptions: Mutex<HashMap<String, mpsc::UnboundedSender<Frame>>>,
    receipts: Mutex<HashMap<String, oneshot::Sender<()>>>,
}

/// Unwrap the I/O error behind a codec failure so it can be attached as a
/// `source`.
fn into_io(err: BenchError) -> io::Error {
    match err {
        BenchError::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

fn configure_socket(stream: TcpStream, buffer_size: Option<usize>) -> io::Result<TcpStream> {
    let std_stream = stream.into_std()?;
    let socket = socket2::Socket::from(std_stream.try_clone()?);
    socket.set_nodelay(true)?;
    if let Some(size) = buffer_size {
        socket.set_recv_buffer_size(size)?;
        socket.set_send_buffer_size(size)?;
    }
    TcpStream::from_std(std_stream)
}

#[async_trait]
impl Connector for StompConnector {
    async fn connect(
        &self,
        address: &ServerAddress,
        client_id: &str,
    ) -> Result<Box<dyn BrokerClient>> {
        let connection_error = |source: io::Error| BenchError::Connection {
            client_id: client_id.to_string(),
            address: address.to_string(),
            source,
        };
        let timed_out = || {
            connection_error(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no answer within {:?}", self.config.connect_timeout),
            ))
        };

        debug!(client_id, %address, "Connecting to STOMP broker");
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect((address.host.as_str(), address.port)),
        )
        .await
        .map_err(|_| timed_out())?
        .map_err(connection_error)?;
        let stream =
            configure_socket(stream, self.config.buffer_size).map_err(connection_error)?;

        let (read_half, write_half) = stream.into_split();
        let mut frames = FramedRead::new(read_half, StompCodec::new());
        let mut sink = FramedWrite::new(write_half, StompCodec::new());

        let connect = Frame::new(Command::Connect)
            .with_header("accept-version", "1.0,1.1,1.2")
            .with_header("host", address.host.as_str())
            .with_header("client-id", client_id)
            .with_header("heart-beat", "0,0");
        sink.send(connect)
            .await
            .map_err(|e| connection_error(into_io(e)))?;

        let reply = match timeout(self.config.connect_timeout, frames.next()).await {
            Err(_) => return Err(timed_out()),
            Ok(None) => {
                return Err(connection_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed during handshake",
                )))
            }
            Ok(Some(reply)) => reply.map_err(|e| connection_error(into_io(e)))?,
        };

        match reply.command {
            Command::Connected => {
                debug!(
                    client_id,
                    version = reply.header("version").unwrap_or("1.0"),
                    server = reply.header("server").unwrap_or("unknown"),
                    "STOMP session established"
                );
            }
            Command::Error => {
                let message = reply
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| String::from_utf8_lossy(&reply.body).into_owned());
                return Err(BenchError::ConnectionRejected {
                    client_id: client_id.to_string(),
                    message,
                });
            }
            other => {
                return Err(BenchError::Protocol(format!(
                    "expected CONNECTED, got {}",
                    other
                )))
            }
        }

        let routes = Arc::new(Routes::default());
        let reader = tokio::spawn(read_loop(frames, routes.clone(), client_id.to_string()));

        Ok(Box::new(StompClient {
            client_id: client_id.to_string(),
            sink,
            routes,
            reader,
            next_subscription: 0,
            receipt_timeout: self.config.receipt_timeout,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "stomp"
    }
}

async fn read_loop(
    mut frames: FramedRead<OwnedReadHalf, StompCodec>,
    routes: Arc<Routes>,
    client_id: String,
) {
    while let Some(result) = frames.next().await {
        let frame = match result {
            Ok(frame) => frame,
            Err(e) => {
                warn!(client_id = %client_id, error = %e, "Dropping STOMP connection");
                break;
            }
        };

        match frame.command {
            Command::Message => {
                let route = frame
                    .header("subscription")
                    .and_then(|id| routes.subscriptions.lock().get(id).cloned());
                match route {
                    Some(sender) => {
                        let _ = sender.send(frame);
                    }
                    None => trace!(client_id = %client_id, "MESSAGE for unknown subscription"),
                }
            }
            Command::Receipt => {
                let pending = frame
                    .header("receipt-id")
                    .and_then(|id| routes.receipts.lock().remove(id));
                if let Some(pending) = pending {
                    let _ = pending.send(());
                }
            }
            Command::Error => {
                warn!(
                    client_id = %client_id,
                    message = frame.header("message").unwrap_or(""),
                    "Broker sent ERROR"
                );
                break;
            }
            other => trace!(client_id = %client_id, command = %other, "Ignoring frame"),
        }
    }

    // Ends every subscription stream and fails every pending receipt.
    routes.subscriptions.lock().clear();
    routes.receipts.lock().clear();
    debug!(client_id = %client_id, "STOMP reader finished");
}

/// A connected STOMP session
pub struct StompClient {
    client_id: String,
    sink: FramedWrite<OwnedWriteHalf, StompCodec>,
    routes: Arc<Routes>,
    reader: JoinHandle<()>,
    next_subscription: u64,
    receipt_timeout: Duration,
    closed: bool,
}

impl StompClient {
    fn delivery_error(destination: &str, source: io::Error) -> BenchError {
        BenchError::Delivery {
            destination: destination.to_string(),
            source,
        }
    }

    fn ensure_open(&self, destination: &str) -> Result<()> {
        if self.closed || self.reader.is_finished() {
            return Err(Self::delivery_error(
                destination,
                io::Error::new(io::ErrorKind::NotConnected, "connection closed"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for StompClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&mut self, destination: &str, payload: &Bytes) -> Result<()> {
        if self.closed {
            return Err(Self::delivery_error(
                destination,
                io::Error::new(io::ErrorKind::NotConnected, "connection closed"),
            ));
        }
        let frame = Frame::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-length", payload.len().to_string())
            .with_body(payload.clone());
        self.sink
            .feed(frame)
            .await
            .map_err(|e| Self::delivery_error(destination, into_io(e)))
    }

    async fn flush(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        SinkExt::<Frame>::flush(&mut self.sink).await
    }

    async fn subscribe(&mut self, destination: &str) -> Result<Subscription> {
        self.ensure_open(destination)?;

        let id = self.next_subscription.to_string();
        self.next_subscription += 1;
        let receipt = format!("subscribe-{}", id);

        let (sender, receiver) = mpsc::unbounded_channel();
        let (confirm, confirmed) = oneshot::channel();
        self.routes.subscriptions.lock().insert(id.clone(), sender);
        self.routes.receipts.lock().insert(receipt.clone(), confirm);

        let frame = Frame::new(Command::Subscribe)
            .with_header("id", id.as_str())
            .with_header("destination", destination)
            .with_header("ack", "auto")
            .with_header("receipt", receipt.as_str());
        self.sink
            .send(frame)
            .await
            .map_err(|e| Self::delivery_error(destination, into_io(e)))?;

        match timeout(self.receipt_timeout, confirmed).await {
            Ok(Ok(())) => {
                debug!(client_id = %self.client_id, destination, subscription = %id, "Subscribed");
                Ok(Subscription::new(id, destination, receiver))
            }
            Ok(Err(_)) => Err(BenchError::SubscriptionClosed {
                client_id: self.client_id.clone(),
            }),
            Err(_) => {
                self.routes.receipts.lock().remove(&receipt);
                Err(Self::delivery_error(
                    destination,
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no RECEIPT for SUBSCRIBE within {:?}", self.receipt_timeout),
                    ),
                ))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let disconnect = self.sink.send(Frame::new(Command::Disconnect)).await;
        let shutdown = SinkExt::<Frame>::close(&mut self.sink).await;
        self.reader.abort();
        debug!(client_id = %self.client_id, "Disconnected");
        disconnect.and(shutdown)
    }
}

impl Drop for StompClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
