//! An in-memory broker connection, useful for testing and development.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{BrokerChannel, BrokerConnection, BrokerMessage};
use crate::{Error, Result};

#[derive(Debug)]
struct Shared {
    messages: Mutex<Vec<BrokerMessage>>,
    available: AtomicBool,
    channels_opened: AtomicUsize,
}

/// Records every accepted message. Can be switched off to simulate an
/// outage: while unavailable, opening a channel fails and publishing closes
/// the channel with an error.
///
/// Clones share the same recorded messages.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self {
            shared: Arc::new(Shared {
                messages: Mutex::new(Vec::new()),
                available: AtomicBool::new(true),
                channels_opened: AtomicUsize::new(0),
            }),
        }
    }
}

impl InMemoryBroker {
    /// Messages accepted so far, oldest first.
    pub fn published(&self) -> Vec<BrokerMessage> {
        self.shared.messages.lock().clone()
    }

    /// Simulates an outage (`false`) or recovery (`true`).
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of channels opened since creation.
    pub fn channels_opened(&self) -> usize {
        self.shared.channels_opened.load(Ordering::SeqCst)
    }

    fn is_available(&self) -> bool {
        self.shared.available.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnection for InMemoryBroker {
    type Channel = InMemoryChannel;

    async fn open_channel(&self) -> Result<InMemoryChannel> {
        if !self.is_available() {
            return Err(Error::Broker("connection refused".to_owned()));
        }
        self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(InMemoryChannel {
            broker: self.clone(),
            open: true,
        })
    }
}

/// A channel of [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryChannel {
    broker: InMemoryBroker,
    open: bool,
}

#[async_trait]
impl BrokerChannel for InMemoryChannel {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn publish(&mut self, message: &BrokerMessage) -> Result<()> {
        if !self.broker.is_available() {
            self.open = false;
            return Err(Error::Broker("broker unavailable".to_owned()));
        }
        self.broker.shared.messages.lock().push(message.clone());
        Ok(())
    }
}
