//! In-process publish/subscribe channels.
//!
//! Each named channel is a `tokio::sync::broadcast` channel created on first
//! use. Delivery is fire-and-forget: publishing with no subscribers succeeds
//! and drops the message, and a subscriber that falls more than `capacity`
//! messages behind loses the oldest ones and is told how many on its next
//! receive.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

/// Channel carrying JSON `SensorReading`s.
pub const READINGS: &str = "readings";
/// Channel carrying JSON `AnomalyEvent`s.
pub const ANOMALIES: &str = "anomalies";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel closed")]
    Closed,
    #[error("subscriber lagged behind, {0} messages dropped")]
    Lagged(u64),
    #[error("bus unavailable: {0}")]
    Unavailable(String),
}

/// Outbound half of the bus, as seen by producers.
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `channel`, returning how many subscribers saw it.
    fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError>;
}

#[derive(Clone)]
pub struct Bus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
    capacity: usize,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>, BusError> {
        if let Some(tx) = self
            .channels
            .read()
            .map_err(|e| BusError::Unavailable(e.to_string()))?
            .get(channel)
        {
            return Ok(tx.clone());
        }
        let mut channels = self
            .channels
            .write()
            .map_err(|e| BusError::Unavailable(e.to_string()))?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone())
    }

    /// Subscribe to `channel`. Only messages published after this call are
    /// delivered.
    pub fn subscribe(&self, channel: &str) -> Result<Subscription, BusError> {
        Ok(Subscription {
            channel: channel.to_string(),
            rx: self.sender(channel)?.subscribe(),
        })
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|c| c.get(channel).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }
}

impl Publisher for Bus {
    fn publish(&self, channel: &str, payload: String) -> Result<usize, BusError> {
        // send only fails when nobody is listening, which is not an error here
        Ok(self.sender(channel)?.send(payload).unwrap_or(0))
    }
}

/// Inbound half of the bus for one channel.
pub struct Subscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<String, BusError> {
        match self.rx.recv().await {
            Ok(payload) => Ok(payload),
            Err(RecvError::Closed) => Err(BusError::Closed),
            Err(RecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }
}
