//! The write-then-read transaction against the line PLC.
//!
//! A transaction writes the four control values and then reads the status,
//! clock and identifier ranges. Every step is attempted even if an earlier one
//! failed, and each step records its own outcome in the [`TransactionResult`].
//! Only a failed connection attempt ends the transaction early.

use crate::{
    protocol as proto,
    session::{RegisterBus, Session},
    tokio_common::{ConnectError, ConnectionConfig, Error},
    tokio_sync::LinePlc,
};
use log::*;
use std::fmt;

/// Why writing the control values failed.
#[derive(thiserror::Error, Debug)]
pub enum WriteError {
    /// Not exactly four control values were supplied.
    #[error("Expected {expected} control values, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A control value does not fit into a register.
    #[error("Control value {value} at index {index} is outside of 0..=65535")]
    InvalidValue { index: usize, value: i64 },

    /// The PLC or the transport rejected the write request.
    #[error("PLC rejected the control values: {0}")]
    DeviceRejected(#[source] Error),
}

impl WriteError {
    /// One of `"invalid_length"`, `"invalid_value"` or `"device_rejected"`.
    pub fn reason(&self) -> &'static str {
        match self {
            WriteError::InvalidLength { .. } => "invalid_length",
            WriteError::InvalidValue { .. } => "invalid_value",
            WriteError::DeviceRejected(_) => "device_rejected",
        }
    }

    /// `true` if the write request ran into the configured timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, WriteError::DeviceRejected(err) if err.is_timeout())
    }
}

impl From<proto::Error> for WriteError {
    fn from(err: proto::Error) -> Self {
        match err {
            proto::Error::InvalidControlValueCount { expected, actual } => {
                WriteError::InvalidLength { expected, actual }
            }
            proto::Error::ControlValueOutOfRange { index, value } => {
                WriteError::InvalidValue { index, value }
            }
            other => WriteError::DeviceRejected(other.into()),
        }
    }
}

/// Reading or decoding one register range failed.
#[derive(thiserror::Error, Debug)]
#[error("Reading the {range} registers failed: {source}")]
pub struct ReadError {
    pub range: proto::RangeKind,
    #[source]
    pub source: Error,
}

impl ReadError {
    /// The reason of the underlying error, e.g. `"timeout"` or `"non_ascii"`.
    pub fn reason(&self) -> &'static str {
        self.source.reason()
    }

    /// `true` if the registers were read but could not be decoded.
    pub fn is_decode_error(&self) -> bool {
        matches!(self.source, Error::ProtocolError(_))
    }
}

/// The outcome of one transaction.
///
/// A result is in one of three states, and callers have to tell all of them apart:
///
/// * `connected == true`: `fatal_error` is `None` and every slot holds its
///   own success or error.
/// * `connected == false` with `fatal_error` set: the connection attempt
///   failed and no slot is populated.
/// * `connected == false` with `fatal_error == None`: the control values were
///   rejected before connecting ([`TransactionResult::rejected`]). Only
///   `write` is populated, with [`WriteError::InvalidLength`] or
///   [`WriteError::InvalidValue`]. Code that takes `!connected` to mean
///   "`fatal_error` is set" misses this case.
#[derive(Debug)]
pub struct TransactionResult {
    pub connected: bool,
    pub write: Option<Result<(), WriteError>>,
    pub status: Option<Result<proto::StatusBlock, ReadError>>,
    pub clock: Option<Result<proto::DeviceTimestamp, ReadError>>,
    pub identifier: Option<Result<String, ReadError>>,
    pub fatal_error: Option<ConnectError>,
}

impl TransactionResult {
    /// The result of a transaction that could not connect.
    pub fn fatal(err: ConnectError) -> Self {
        Self {
            connected: false,
            write: None,
            status: None,
            clock: None,
            identifier: None,
            fatal_error: Some(err),
        }
    }

    /// The result of a transaction whose input was rejected before connecting.
    ///
    /// This is the only state with `connected == false` and no `fatal_error`.
    pub fn rejected(err: WriteError) -> Self {
        Self {
            connected: false,
            write: Some(Err(err)),
            status: None,
            clock: None,
            identifier: None,
            fatal_error: None,
        }
    }

    /// `true` if the write and all reads succeeded.
    pub fn is_complete(&self) -> bool {
        matches!(self.write, Some(Ok(())))
            && matches!(self.status, Some(Ok(_)))
            && matches!(self.clock, Some(Ok(_)))
            && matches!(self.identifier, Some(Ok(_)))
    }

    /// The decoded machine state, if all three reads succeeded.
    ///
    /// The write outcome does not matter here.
    pub fn snapshot(&self) -> Option<proto::Snapshot> {
        match (&self.status, &self.clock, &self.identifier) {
            (Some(Ok(status)), Some(Ok(clock)), Some(Ok(product_code))) => {
                Some(proto::Snapshot::new(status, *clock, product_code))
            }
            _ => None,
        }
    }
}

fn fmt_slot<T: fmt::Display, E: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    slot: &Option<Result<T, E>>,
) -> fmt::Result {
    match slot {
        Some(Ok(value)) => writeln!(f, "{name}: {value}"),
        Some(Err(err)) => writeln!(f, "{name}: error: {err}"),
        None => writeln!(f, "{name}: -"),
    }
}

impl fmt::Display for TransactionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(err) = &self.fatal_error {
            return writeln!(f, "not connected: {err}");
        }
        match &self.write {
            Some(Ok(())) => writeln!(f, "write: ok")?,
            Some(Err(err)) => writeln!(f, "write: error: {err}")?,
            None => writeln!(f, "write: -")?,
        }
        fmt_slot(f, "status", &self.status)?;
        if let Some(Ok(status)) = &self.status {
            for warning in &status.warnings {
                writeln!(f, "  warning: {warning}")?;
            }
        }
        fmt_slot(f, "clock", &self.clock)?;
        fmt_slot(f, "product code", &self.identifier)
    }
}

fn read_slot<T>(
    range: proto::RangeKind,
    result: crate::tokio_common::Result<T>,
) -> Option<Result<T, ReadError>> {
    if let Err(err) = &result {
        warn!("Reading {range} registers failed: {err}");
    }
    Some(result.map_err(|source| ReadError { range, source }))
}

/// Runs the write and the three reads on an open bus.
///
/// `write_values` must hold exactly four values. Otherwise the write is
/// recorded as [`WriteError::InvalidLength`] without a request being sent,
/// and the reads still run.
pub fn execute<B: RegisterBus + ?Sized>(bus: &mut B, write_values: &[u16]) -> TransactionResult {
    let write = proto::ControlValues::try_from(write_values)
        .map_err(WriteError::from)
        .and_then(|values| {
            debug!("Writing control values {values}");
            LinePlc::write_control_values(bus, &values).map_err(WriteError::DeviceRejected)
        });
    if let Err(err) = &write {
        warn!("Writing control values failed: {err}");
    }

    let status = read_slot(proto::RangeKind::Status, LinePlc::read_status(bus));
    if let Some(Ok(status)) = &status {
        for warning in &status.warnings {
            warn!("Status registers: {warning}");
        }
    }
    let clock = read_slot(proto::RangeKind::Clock, LinePlc::read_clock(bus));
    let identifier = read_slot(
        proto::RangeKind::Identifier,
        LinePlc::read_product_code(bus),
    );

    TransactionResult {
        connected: true,
        write: Some(write),
        status,
        clock,
        identifier,
        fatal_error: None,
    }
}

/// Connects to the PLC, runs one transaction and releases the connection.
///
/// This is the entry point for outer layers. Input validation happens first,
/// so malformed control values never cause network traffic. No error escapes:
/// every failure ends up in the returned [`TransactionResult`].
///
/// ```no_run
/// use lineplc_lib::{tokio_common::ConnectionConfig, transaction};
///
/// let config = ConnectionConfig::new("192.168.5.1", 502);
/// let result = transaction::operate(&config, &[1, 1, 1, 1]);
/// if let Some(snapshot) = result.snapshot() {
///     println!("{snapshot}");
/// } else {
///     print!("{result}");
/// }
/// ```
pub fn operate(config: &ConnectionConfig, write_values: &[i64]) -> TransactionResult {
    let values = match proto::ControlValues::from_ints(write_values) {
        Ok(values) => values,
        Err(err) => {
            warn!("Rejected control values {write_values:?}: {err}");
            return TransactionResult::rejected(err.into());
        }
    };

    let mut session = match Session::open(config) {
        Ok(session) => session,
        Err(err) => {
            error!("Cannot connect to PLC: {err}");
            return TransactionResult::fatal(err);
        }
    };
    let result = execute(&mut session, values.as_slice());
    session.close();
    result
}
