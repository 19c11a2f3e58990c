//! Connection handling for one PLC endpoint.
//!
//! A [`Session`] wraps a synchronous `tokio-modbus` TCP context. It is opened
//! with a single connect attempt, is used by one caller at a time and is
//! closed when dropped. [`Session::close`] may be called any number of times.
//!
//! ```no_run
//! use lineplc_lib::{session::Session, tokio_common::ConnectionConfig, tokio_sync::LinePlc};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("192.168.5.1", 502);
//!     let mut session = Session::open(&config)?;
//!     let clock = LinePlc::read_clock(&mut session)?;
//!     println!("PLC clock: {clock}");
//!     session.close();
//!     Ok(())
//! }
//! ```

use crate::{
    protocol as proto,
    tokio_common::{ConnectError, ConnectionConfig, Error, Result},
};
use log::*;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio_modbus::{
    client::sync::Context,
    prelude::{SyncReader, SyncWriter},
    slave::SlaveContext,
    Slave,
};

/// Register level access to one PLC unit.
///
/// Implemented by [`Session`]; the register operations in
/// [`crate::tokio_sync`] and the transaction executor only depend on this trait.
pub trait RegisterBus {
    /// The unit id requests are addressed to.
    fn unit_id(&self) -> u8;

    /// Reads all holding registers of `range`.
    fn read_range(&mut self, range: &proto::RegisterRange) -> Result<Vec<u16>>;

    /// Writes `values` to consecutive holding registers starting at `range.start_address`.
    fn write_range(&mut self, range: &proto::RegisterRange, values: &[u16]) -> Result<()>;

    /// Writes a single holding register.
    fn write_single(&mut self, address: u16, value: u16) -> Result<()>;
}

/// Helper function to map tokio result to our result.
fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
    match result {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.into()), // Modbus exception
        Err(err) => Err(err.into()),     // IO error
    }
}

/// A live connection to the PLC.
///
/// When a request times out its reply may still arrive later and would be
/// taken as the answer to the next request. The session therefore marks the
/// connection as stale and [reconnects](Session::reconnect) before the next
/// request is sent.
pub struct Session {
    ctx: Option<Context>,
    endpoint: SocketAddr,
    unit_id: u8,
    timeout: Duration,
    stale: bool,
}

impl Session {
    /// Connects to the endpoint described by `config`.
    ///
    /// Exactly one connection attempt is made. The configured timeout bounds
    /// the connect call and every request issued through the session.
    ///
    /// # Errors
    ///
    /// * [`ConnectError::Unreachable`] if the host cannot be resolved or reached.
    /// * [`ConnectError::Timeout`] if the attempt did not finish in time.
    /// * [`ConnectError::Refused`] if the endpoint refused the connection.
    pub fn open(config: &ConnectionConfig) -> std::result::Result<Self, ConnectError> {
        let endpoint = resolve(config)?;
        debug!(
            "Connecting to PLC at {endpoint} (unit {}, timeout {:?})",
            config.unit_id, config.timeout
        );
        let ctx = connect(endpoint, config.unit_id, config.timeout)
            .map_err(|err| ConnectError::from_io(config.endpoint(), config.timeout, err))?;
        info!("Connected to PLC at {endpoint}");
        Ok(Self {
            ctx: Some(ctx),
            endpoint,
            unit_id: config.unit_id,
            timeout: config.timeout,
            stale: false,
        })
    }

    /// Replaces the connection of an open session with a new one to the same endpoint.
    ///
    /// The old connection is only released once the new one is established,
    /// so a failed attempt leaves the session open and the next request tries again.
    ///
    /// # Errors
    ///
    /// * [`Error::SessionClosed`] if the session was closed.
    /// * [`Error::Connect`] if the connection attempt failed.
    pub fn reconnect(&mut self) -> Result<()> {
        if self.ctx.is_none() {
            return Err(Error::SessionClosed);
        }
        debug!("Reconnecting to PLC at {}", self.endpoint);
        let ctx = connect(self.endpoint, self.unit_id, self.timeout)
            .map_err(|err| ConnectError::from_io(self.endpoint.to_string(), self.timeout, err))?;
        self.ctx = Some(ctx);
        self.stale = false;
        Ok(())
    }

    /// Releases the connection. Calling this on a closed session does nothing.
    pub fn close(&mut self) {
        if self.ctx.take().is_some() {
            debug!("Closed session to PLC at {}", self.endpoint);
        }
    }

    pub fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn request<T, F>(&mut self, unit_id: u8, call: F) -> Result<T>
    where
        F: FnOnce(&mut Context) -> tokio_modbus::Result<T>,
    {
        if self.ctx.is_some() && self.stale {
            self.reconnect()?;
        }
        let ctx = self.ctx.as_mut().ok_or(Error::SessionClosed)?;
        ctx.set_slave(Slave(unit_id));
        let result = map_tokio_result(call(ctx));
        if let Err(err) = &result {
            if err.is_timeout() {
                warn!(
                    "Request to PLC at {} timed out, reconnecting before the next request",
                    self.endpoint
                );
                self.stale = true;
            }
        }
        result
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("unit_id", &self.unit_id)
            .field("timeout", &self.timeout)
            .field("open", &self.is_open())
            .field("stale", &self.stale)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl RegisterBus for Session {
    fn unit_id(&self) -> u8 {
        self.unit_id
    }

    fn read_range(&mut self, range: &proto::RegisterRange) -> Result<Vec<u16>> {
        trace!("Reading holding registers {range}");
        self.request(range.unit_id, |ctx| {
            ctx.read_holding_registers(range.start_address, range.count)
        })
    }

    fn write_range(&mut self, range: &proto::RegisterRange, values: &[u16]) -> Result<()> {
        trace!("Writing {values:?} to holding registers {range}");
        self.request(range.unit_id, |ctx| {
            ctx.write_multiple_registers(range.start_address, values)
        })
    }

    fn write_single(&mut self, address: u16, value: u16) -> Result<()> {
        trace!("Writing {value} to holding register {address}");
        let unit_id = self.unit_id;
        self.request(unit_id, |ctx| ctx.write_single_register(address, value))
    }
}

fn connect(endpoint: SocketAddr, unit_id: u8, timeout: Duration) -> std::io::Result<Context> {
    let mut ctx = tokio_modbus::client::sync::tcp::connect_slave_with_timeout(
        endpoint,
        Slave(unit_id),
        Some(timeout),
    )?;
    ctx.set_timeout(timeout);
    Ok(ctx)
}

fn resolve(config: &ConnectionConfig) -> std::result::Result<SocketAddr, ConnectError> {
    let unreachable = |source| ConnectError::Unreachable {
        endpoint: config.endpoint(),
        source,
    };
    (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(unreachable)?
        .next()
        .ok_or_else(|| {
            unreachable(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                "host resolved to no address",
            ))
        })
}
