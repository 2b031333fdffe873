//! Handle table for language bindings
//!
//! Scripts cannot own a [`Session`], so bindings keep sessions here and
//! pass integer handles around instead. Every open gets its own handle and
//! its own descriptor; nothing is shared between sessions.

use crate::backend::{BoxedBackend, BoxedConnector};
use crate::error::{Error, Result};
use crate::session::{OpenParams, Session, TransferParams};

use std::collections::BTreeMap;

/// Snapshot of an open session as handed to a binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Table handle
    pub handle: u32,
    /// Device path
    pub device: String,
    /// Negotiated raw mode byte
    pub mode: u8,
    /// Negotiated word size
    pub bits_per_word: u8,
    /// Negotiated clock speed in Hz
    pub speed_hz: u32,
    /// Per-transfer delay in microseconds
    pub delay_usecs: u16,
}

/// Sessions indexed by handle
pub struct SessionTable {
    connector: BoxedConnector,
    sessions: BTreeMap<u32, Session<BoxedBackend>>,
    next_handle: u32,
}

impl SessionTable {
    /// Empty table opening devices through `connector`
    pub fn new(connector: BoxedConnector) -> Self {
        Self {
            connector,
            sessions: BTreeMap::new(),
            next_handle: 1,
        }
    }

    /// Name of the connector backing this table
    pub fn backend_name(&self) -> &'static str {
        self.connector.name()
    }

    /// Open and configure a device, returning its negotiated info
    pub fn open(&mut self, params: &OpenParams) -> Result<SessionInfo> {
        let session = Session::open(&self.connector, params)?;
        let handle = self.allocate_handle();
        let info = describe(handle, &session);
        self.sessions.insert(handle, session);
        log::debug!("Session {} bound to {}", handle, params.device);
        Ok(info)
    }

    /// Transfer on the session behind `handle`
    pub fn transfer(
        &mut self,
        handle: u32,
        tx: &[u8],
        overrides: &TransferParams,
    ) -> Result<Vec<u8>> {
        self.sessions
            .get_mut(&handle)
            .ok_or(Error::NotOpen)?
            .transfer_with(tx, overrides)
    }

    /// Close the session behind `handle` and forget it
    pub fn close(&mut self, handle: u32) -> Result<()> {
        let mut session = self.sessions.remove(&handle).ok_or(Error::NotOpen)?;
        session.close()
    }

    /// Current info for `handle`
    pub fn info(&self, handle: u32) -> Result<SessionInfo> {
        self.sessions
            .get(&handle)
            .map(|session| describe(handle, session))
            .ok_or(Error::NotOpen)
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Close every open session, returning how many were closed
    pub fn close_all(&mut self) -> usize {
        let sessions = std::mem::take(&mut self.sessions);
        let count = sessions.len();
        for (handle, mut session) in sessions {
            if let Err(e) = session.close() {
                log::warn!("Failed to close session {}: {}", handle, e);
            }
        }
        count
    }

    fn allocate_handle(&mut self) -> u32 {
        loop {
            let handle = self.next_handle;
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.sessions.contains_key(&handle) {
                return handle;
            }
        }
    }
}

fn describe(handle: u32, session: &Session<BoxedBackend>) -> SessionInfo {
    let params = session.params();
    SessionInfo {
        handle,
        device: session.device().to_string(),
        mode: params.mode,
        bits_per_word: params.bits_per_word,
        speed_hz: params.speed_hz,
        delay_usecs: params.delay_usecs,
    }
}
