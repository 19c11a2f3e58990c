//! Thread-safe synchronous client for the line PLC.
//!
//! The PLC answers one request at a time, so concurrent transactions from
//! different callers must not interleave on the wire. `SafeClient` is a
//! cloneable handle that serializes all calls through a shared lock and opens
//! a fresh [`Session`] for every call.
//!
//! ## Example
//!
//! ```no_run
//! use lineplc_lib::{tokio_common::ConnectionConfig, tokio_sync_safe_client::SafeClient};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SafeClient::new(ConnectionConfig::new("192.168.5.1", 502));
//!
//!     let worker = client.clone();
//!     let handle = std::thread::spawn(move || worker.operate(&[1, 1, 1, 1]));
//!
//!     println!("PLC clock: {}", client.read_clock()?);
//!     print!("{}", handle.join().expect("worker panicked"));
//!
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    session::Session,
    tokio_common::{ConnectionConfig, Result},
    tokio_sync::LinePlc,
    transaction::{self, TransactionResult},
};
use std::sync::{Arc, Mutex, MutexGuard};

/// Serializes access to one PLC across threads.
#[derive(Debug, Clone)]
pub struct SafeClient {
    config: Arc<ConnectionConfig>,
    lock: Arc<Mutex<()>>,
}

impl SafeClient {
    /// Creates a new `SafeClient` for the endpoint in `config`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a new `SafeClient` sharing `lock` with other clients of the same device.
    pub fn from_shared(config: ConnectionConfig, lock: Arc<Mutex<()>>) -> Self {
        Self {
            config: Arc::new(config),
            lock,
        }
    }

    /// Clones the shared lock.
    pub fn clone_shared(&self) -> Arc<Mutex<()>> {
        self.lock.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn exclusive(&self) -> MutexGuard<'_, ()> {
        // The guarded unit value cannot be left inconsistent by a panic.
        self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_session<T>(&self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let _guard = self.exclusive();
        let mut session = Session::open(&self.config)?;
        let result = op(&mut session);
        session.close();
        result
    }

    /// Runs one write-then-read transaction, see [`transaction::operate`].
    pub fn operate(&self, write_values: &[i64]) -> TransactionResult {
        let _guard = self.exclusive();
        transaction::operate(&self.config, write_values)
    }

    /// Reads gate, motor and temperature registers.
    pub fn read_status(&self) -> Result<proto::StatusBlock> {
        self.with_session(|session| LinePlc::read_status(session))
    }

    /// Reads the PLC real-time clock.
    pub fn read_clock(&self) -> Result<proto::DeviceTimestamp> {
        self.with_session(|session| LinePlc::read_clock(session))
    }

    /// Reads the product identifier.
    pub fn read_product_code(&self) -> Result<String> {
        self.with_session(|session| LinePlc::read_product_code(session))
    }

    /// Writes a single control value.
    pub fn write_control_value(&self, index: usize, value: u16) -> Result<()> {
        self.with_session(|session| LinePlc::write_control_value(session, index, value))
    }
}
