//! Signal delivery into suspended lifecycle instances.
//!
//! Each instance owns a [`SignalInbox`]; senders reach it through the
//! [`SignalRouter`] by the instance's [`LifecycleKey`]. Delivery never blocks
//! the sender. Signals are queued FIFO per signal name with no loss: while an
//! instance waits for `match`, an early `payment` is buffered and handed out
//! by the next `receive(Payment)`.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::agents::LifecycleKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalName {
    Match,
    Payment,
}

impl fmt::Display for SignalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "match"),
            Self::Payment => write!(f, "payment"),
        }
    }
}

/// Events a trip lifecycle reacts to. `false` payloads mean "try again".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "ok", rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// A match cycle paired (or failed to pair) the passenger with a driver.
    Match(bool),
    /// The passenger's payment attempt was accepted or rejected.
    Payment(bool),
}

impl LifecycleSignal {
    pub fn name(&self) -> SignalName {
        match self {
            Self::Match(_) => SignalName::Match,
            Self::Payment(_) => SignalName::Payment,
        }
    }

    pub fn payload(&self) -> bool {
        match self {
            Self::Match(ok) | Self::Payment(ok) => *ok,
        }
    }

    fn from_parts(name: SignalName, ok: bool) -> Self {
        match name {
            SignalName::Match => Self::Match(ok),
            SignalName::Payment => Self::Payment(ok),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignalError {
    #[error("no lifecycle instance registered for key {0}")]
    UnknownTarget(LifecycleKey),
    #[error("lifecycle instance {0} no longer accepts signals")]
    Closed(LifecycleKey),
    #[error("{0} signal channel closed while waiting")]
    ChannelClosed(SignalName),
}

/// Sending half used by the match cycle and by clients.
pub trait SignalSender: Send + Sync {
    fn send(&self, key: &LifecycleKey, signal: LifecycleSignal) -> Result<(), SignalError>;
}

/// Routes signals to registered inboxes by lifecycle key.
#[derive(Debug, Clone, Default)]
pub struct SignalRouter {
    routes: Arc<RwLock<HashMap<LifecycleKey, mpsc::UnboundedSender<LifecycleSignal>>>>,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an inbox for `key`, replacing any previous registration.
    pub fn register(&self, key: LifecycleKey) -> SignalInbox {
        self.register_with_pending(key, Vec::new())
    }

    /// Opens an inbox that first yields the buffered signals of a restored checkpoint.
    pub fn register_with_pending(
        &self,
        key: LifecycleKey,
        pending: Vec<LifecycleSignal>,
    ) -> SignalInbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes.write().insert(key.clone(), tx);
        SignalInbox::new(key, rx, pending)
    }

    /// Stops routing to `key`; later sends fail with [`SignalError::UnknownTarget`].
    pub fn unregister(&self, key: &LifecycleKey) {
        self.routes.write().remove(key);
    }
}

impl SignalSender for SignalRouter {
    fn send(&self, key: &LifecycleKey, signal: LifecycleSignal) -> Result<(), SignalError> {
        let routes = self.routes.read();
        let tx = routes
            .get(key)
            .ok_or_else(|| SignalError::UnknownTarget(key.clone()))?;
        tx.send(signal).map_err(|_| {
            warn!(key = %key, signal = %signal.name(), "signal sent to a finished instance");
            SignalError::Closed(key.clone())
        })?;
        debug!(key = %key, signal = %signal.name(), ok = signal.payload(), "signal sent");
        Ok(())
    }
}

/// Receiving half owned by one lifecycle instance.
#[derive(Debug)]
pub struct SignalInbox {
    key: LifecycleKey,
    rx: mpsc::UnboundedReceiver<LifecycleSignal>,
    pending: HashMap<SignalName, VecDeque<bool>>,
    /// Arrival order across names, so checkpoints restore the same interleaving.
    order: VecDeque<SignalName>,
}

impl SignalInbox {
    fn new(
        key: LifecycleKey,
        rx: mpsc::UnboundedReceiver<LifecycleSignal>,
        pending: Vec<LifecycleSignal>,
    ) -> Self {
        let mut inbox = Self {
            key,
            rx,
            pending: HashMap::new(),
            order: VecDeque::new(),
        };
        for signal in pending {
            inbox.buffer(signal);
        }
        inbox
    }

    fn buffer(&mut self, signal: LifecycleSignal) {
        self.pending
            .entry(signal.name())
            .or_default()
            .push_back(signal.payload());
        self.order.push_back(signal.name());
    }

    fn take_buffered(&mut self, name: SignalName) -> Option<bool> {
        let payload = self.pending.get_mut(&name)?.pop_front()?;
        if let Some(pos) = self.order.iter().position(|n| *n == name) {
            self.order.remove(pos);
        }
        Some(payload)
    }

    /// Suspends until a `name` signal is available and returns its payload.
    ///
    /// Signals of other names that arrive meanwhile are buffered. Fails with
    /// [`SignalError::ChannelClosed`] if every sender is gone.
    pub async fn receive(&mut self, name: SignalName) -> Result<bool, SignalError> {
        if let Some(payload) = self.take_buffered(name) {
            return Ok(payload);
        }
        loop {
            let Some(signal) = self.rx.recv().await else {
                warn!(key = %self.key, signal = %name, "signal channel closed while waiting");
                return Err(SignalError::ChannelClosed(name));
            };
            if signal.name() == name {
                return Ok(signal.payload());
            }
            debug!(key = %self.key, waiting_for = %name, buffered = %signal.name(), "signal buffered");
            self.buffer(signal);
        }
    }

    /// Moves every signal already delivered to the channel into the buffer.
    pub fn drain_ready(&mut self) {
        while let Ok(signal) = self.rx.try_recv() {
            self.buffer(signal);
        }
    }

    /// Buffered signals in arrival order, for checkpointing.
    pub fn pending(&self) -> Vec<LifecycleSignal> {
        let mut cursors: HashMap<SignalName, usize> = HashMap::new();
        self.order
            .iter()
            .filter_map(|name| {
                let cursor = cursors.entry(*name).or_insert(0);
                let payload = self.pending.get(name)?.get(*cursor).copied()?;
                *cursor += 1;
                Some(LifecycleSignal::from_parts(*name, payload))
            })
            .collect()
    }
}
