use crate::error::{BenchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod codec;
pub mod memory;
pub mod stomp;

pub use codec::StompCodec;
pub use memory::InMemoryBroker;
pub use stomp::{StompConfig, StompConnector};

/// STOMP frame commands understood by the clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }
}

impl FromStr for Command {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "DISCONNECT" => Command::Disconnect,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(BenchError::Protocol(format!("unknown command '{}'", other))),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single broker frame: command, ordered headers and body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = body;
        self
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Broker endpoint parsed from `host:port`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl FromStr for ServerAddress {
    type Err = BenchError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || BenchError::InvalidAddress(s.to_string());
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Inbound side of a subscription
///
/// Frames arrive in broker order. `recv` yields `None` once the connection
/// is gone.
#[derive(Debug)]
pub struct Subscription {
    pub id: String,
    pub destination: String,
    frames: mpsc::UnboundedReceiver<Frame>,
}

impl Subscription {
    pub fn new(
        id: impl Into<String>,
        destination: impl Into<String>,
        frames: mpsc::UnboundedReceiver<Frame>,
    ) -> Self {
        Self {
            id: id.into(),
            destination: destination.into(),
            frames,
        }
    }

    pub async fn recv(&mut self) -> Option<Frame> {
        self.frames.recv().await
    }
}

/// A connected messaging client
#[async_trait]
pub trait BrokerClient: Send {
    /// Identifier the client connected with.
    fn client_id(&self) -> &str;

    /// Hand `payload` to the broker for `destination` without waiting for
    /// any acknowledgement.
    async fn send(&mut self, destination: &str, payload: &Bytes) -> Result<()>;

    /// Push any buffered frames onto the wire.
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Register interest in `destination`. Once this returns, messages
    /// sent to the destination are routed to the subscription.
    async fn subscribe(&mut self, destination: &str) -> Result<Subscription>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Factory for connected clients
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &ServerAddress,
        client_id: &str,
    ) -> Result<Box<dyn BrokerClient>>;

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

/// Available client transports
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TransportKind {
    /// STOMP 1.2 over TCP
    #[clap(name = "stomp")]
    Stomp,

    /// In-process loopback broker (measures harness overhead)
    #[clap(name = "loopback")]
    Loopback,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Stomp => write!(f, "STOMP"),
            TransportKind::Loopback => write!(f, "Loopback"),
        }
    }
}

/// Creates the connector for a transport kind
pub struct TransportFactory;

impl TransportFactory {
    pub fn create(kind: TransportKind, config: StompConfig) -> Arc<dyn Connector> {
        match kind {
            TransportKind::Stomp => Arc::new(StompConnector::new(config)),
            TransportKind::Loopback => Arc::new(InMemoryBroker::new()),
        }
    }
}
