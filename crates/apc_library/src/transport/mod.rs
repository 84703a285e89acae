//! The MIDI link as the rest of the crate sees it.

mod midi;

pub use midi::{MidiConnector, MidiOutputTransport, PortListing, PortSelection, list_ports};

use crate::error::TransportError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Lost(String),
    Closed,
}

/// Outbound half of a MIDI link.
pub trait Transport: Send {
    /// Writes one complete MIDI message.
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError>;
    fn state(&self) -> ConnectionState;
}

/// Opens (or reopens) the device. Used by the sender for the first
/// connection and for every reconnect after a loss.
pub trait Connector: Send {
    fn connect(&mut self) -> Result<Box<dyn Transport>, TransportError>;
}

/// Raw bytes from the input callback, stamped on arrival.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub received: Instant,
    pub bytes: Vec<u8>,
}

impl InboundMessage {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            received: Instant::now(),
            bytes: bytes.to_vec(),
        }
    }
}

/// Connection state shared between the sender thread and everyone else.
/// Going back to `Connected` raises a resync flag so the engine knows the
/// device needs a full frame.
#[derive(Debug)]
pub struct LinkStatus {
    state: Mutex<ConnectionState>,
    resync: AtomicBool,
}

impl LinkStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state: Mutex::new(state),
            resync: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set(&self, state: ConnectionState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *current == state {
            return;
        }
        match &state {
            ConnectionState::Connected => {
                log::info!("MIDI output connected");
                self.resync.store(true, Ordering::SeqCst);
            }
            ConnectionState::Lost(reason) => log::warn!("MIDI output lost: {reason}"),
            ConnectionState::Closed => log::debug!("MIDI output closed"),
        }
        *current = state;
    }

    pub fn take_resync(&self) -> bool {
        self.resync.swap(false, Ordering::SeqCst)
    }
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self::new(ConnectionState::Lost("not connected yet".to_string()))
    }
}

#[derive(Debug, Default)]
struct Recorder {
    sent: Vec<Vec<u8>>,
    failing: bool,
    refuse: bool,
    closed: bool,
}

/// In-process transport that records every message. Clones share the same
/// recording, so a test can keep one clone and hand the other away.
#[derive(Clone, Debug, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Recorder>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorder) -> T) -> T {
        f(&mut self.inner.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.with(|r| r.sent.clone())
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        self.with(|r| std::mem::take(&mut r.sent))
    }

    /// While set, every send fails as if the device had been unplugged.
    pub fn set_failing(&self, failing: bool) {
        self.with(|r| r.failing = failing);
    }

    /// While set, [`MemoryConnector::connect`] fails.
    pub fn set_refusing(&self, refuse: bool) {
        self.with(|r| r.refuse = refuse);
    }

    pub fn close(&self) {
        self.with(|r| r.closed = true);
    }

    /// Connector that hands out clones of this transport.
    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            transport: self.clone(),
        }
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        self.with(|r| {
            if r.closed {
                return Err(TransportError::Disconnected);
            }
            if r.failing {
                return Err(TransportError::Send("device unplugged".to_string()));
            }
            r.sent.push(message.to_vec());
            Ok(())
        })
    }

    fn state(&self) -> ConnectionState {
        self.with(|r| match (r.closed, r.failing) {
            (true, _) => ConnectionState::Closed,
            (false, true) => ConnectionState::Lost("device unplugged".to_string()),
            (false, false) => ConnectionState::Connected,
        })
    }
}

#[derive(Clone, Debug)]
pub struct MemoryConnector {
    transport: MemoryTransport,
}

impl Connector for MemoryConnector {
    fn connect(&mut self) -> Result<Box<dyn Transport>, TransportError> {
        let refused = self.transport.with(|r| {
            if r.refuse || r.failing {
                return true;
            }
            r.closed = false;
            false
        });
        if refused {
            return Err(TransportError::Open("memory transport refusing connections".to_string()));
        }
        Ok(Box::new(self.transport.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_transport_records_and_fails() {
        let log = MemoryTransport::new();
        let mut transport = log.clone();
        transport.send(&[0x90, 1, 5]).unwrap();
        assert_eq!(log.sent(), vec![vec![0x90, 1, 5]]);

        log.set_failing(true);
        assert!(transport.send(&[0x90, 2, 5]).is_err());
        assert!(matches!(transport.state(), ConnectionState::Lost(_)));
        assert_eq!(log.take().len(), 1);
        assert!(log.sent().is_empty());
    }

    #[test]
    fn connector_refuses_while_device_is_gone() {
        let log = MemoryTransport::new();
        let mut connector = log.connector();
        log.set_failing(true);
        assert!(connector.connect().is_err());
        log.set_failing(false);
        let transport = connector.connect().unwrap();
        assert_eq!(transport.state(), ConnectionState::Connected);
    }

    #[test]
    fn reconnect_raises_resync_once() {
        let status = LinkStatus::default();
        assert!(!status.take_resync());
        status.set(ConnectionState::Connected);
        status.set(ConnectionState::Connected);
        assert!(status.take_resync());
        assert!(!status.take_resync());
        status.set(ConnectionState::Lost("gone".into()));
        status.set(ConnectionState::Connected);
        assert!(status.take_resync());
    }
}
