//! In-process loopback broker.
//!
//! Destinations under `/topic/` fan every message out to all live
//! subscriptions; any other destination behaves as a queue and hands each
//! message to one subscription, round-robin. Messages sent to a destination
//! with no subscriptions are dropped, as a broker would for a topic.

use super::{BrokerClient, Command, Connector, Frame, ServerAddress, Subscription};
use crate::error::{BenchError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

struct Route {
    client_id: String,
    subscription_id: String,
    sender: mpsc::UnboundedSender<Frame>,
}

#[derive(Default)]
struct Destination {
    routes: Vec<Route>,
    cursor: usize,
}

#[derive(Default)]
struct BrokerState {
    destinations: HashMap<String, Destination>,
    next_message_id: u64,
    connections: usize,
}

/// Shared handle to an in-process broker. Clones refer to the same broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients connected and not yet closed.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Number of live subscriptions on `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.state
            .lock()
            .destinations
            .get(destination)
            .map_or(0, |d| d.routes.iter().filter(|r| !r.sender.is_closed()).count())
    }

    fn deliver(&self, destination: &str, payload: &Bytes) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.next_message_id += 1;
        let message_id = state.next_message_id;

        let Some(dest) = state.destinations.get_mut(destination) else {
            return;
        };
        dest.routes.retain(|route| !route.sender.is_closed());
        if dest.routes.is_empty() {
            return;
        }

        let frame_for = |route: &Route| {
            Frame::new(Command::Message)
                .with_header("destination", destination)
                .with_header("message-id", message_id.to_string())
                .with_header("subscription", route.subscription_id.as_str())
                .with_header("content-length", payload.len().to_string())
                .with_body(payload.clone())
        };

        if destination.starts_with("/topic/") {
            for route in &dest.routes {
                let _ = route.sender.send(frame_for(route));
            }
        } else {
            let index = dest.cursor % dest.routes.len();
            dest.cursor = index + 1;
            let route = &dest.routes[index];
            let _ = route.sender.send(frame_for(route));
        }
    }

    fn register(&self, destination: &str, route: Route) {
        self.state
            .lock()
            .destinations
            .entry(destination.to_string())
            .or_default()
            .routes
            .push(route);
    }

    fn disconnect(&self, client_id: &str) {
        let mut state = self.state.lock();
        state.connections = state.connections.saturating_sub(1);
        for dest in state.destinations.values_mut() {
            dest.routes.retain(|route| route.client_id != client_id);
        }
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(
        &self,
        address: &ServerAddress,
        client_id: &str,
    ) -> Result<Box<dyn BrokerClient>> {
        debug!(client_id, %address, "Connecting to loopback broker");
        self.state.lock().connections += 1;
        Ok(Box::new(InMemoryClient {
            broker: self.clone(),
            client_id: client_id.to_string(),
            next_subscription: 0,
            closed: false,
        }))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Client handle onto an [`InMemoryBroker`]
pub struct InMemoryClient {
    broker: InMemoryBroker,
    client_id: String,
    next_subscription: u64,
    closed: bool,
}

impl InMemoryClient {
    fn not_connected(&self, destination: &str) -> BenchError {
        BenchError::Delivery {
            destination: destination.to_string(),
            source: io::Error::new(io::ErrorKind::NotConnected, "connection closed"),
        }
    }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
    fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn send(&mut self, destination: &str, payload: &Bytes) -> Result<()> {
        if self.closed {
            return Err(self.not_connected(destination));
        }
        self.broker.deliver(destination, payload);
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str) -> Result<Subscription> {
        if self.closed {
            return Err(self.not_connected(destination));
        }
        let id = self.next_subscription.to_string();
        self.next_subscription += 1;

        let (sender, receiver) = mpsc::unbounded_channel();
        self.broker.register(
            destination,
            Route {
                client_id: self.client_id.clone(),
                subscription_id: id.clone(),
                sender,
            },
        );
        debug!(client_id = %self.client_id, destination, subscription = %id, "Subscribed");
        Ok(Subscription::new(id, destination, receiver))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.broker.disconnect(&self.client_id);
        }
        Ok(())
    }
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        if !self.closed {
            self.broker.disconnect(&self.client_id);
        }
    }
}
