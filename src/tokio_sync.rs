//! Synchronous register operations of the line PLC.
//!
//! This module provides a stateless API (`LinePlc` struct) mapping each
//! register group of the PLC to one function. The functions take any
//! [`RegisterBus`], usually an open [`crate::session::Session`], and convert
//! between the raw registers and the types in [`crate::protocol`].
//!
//! # Examples
//!
//! ```no_run
//! use lineplc_lib::protocol::ControlValues;
//! use lineplc_lib::session::Session;
//! use lineplc_lib::tokio_common::ConnectionConfig;
//! use lineplc_lib::tokio_sync::LinePlc;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = Session::open(&ConnectionConfig::new("192.168.5.1", 502))?;
//!
//!     LinePlc::write_control_values(&mut session, &ControlValues::new([1, 1, 1, 1]))?;
//!     let status = LinePlc::read_status(&mut session)?;
//!     println!("Status: {status}");
//!
//!     Ok(())
//! }
//! ```

use crate::{protocol as proto, session::RegisterBus, tokio_common::Result};

/// Synchronous access to the register groups of the line PLC.
///
/// All methods block the current thread until the PLC answered or the
/// session timeout elapsed.
#[derive(Debug)]
pub struct LinePlc;

impl LinePlc {
    /// Helper function to read holding registers and decode them into a specific type.
    fn read_and_decode<B, T, F>(bus: &mut B, range: proto::RegisterRange, decoder: F) -> Result<T>
    where
        B: RegisterBus + ?Sized,
        F: FnOnce(&[u16]) -> std::result::Result<T, proto::Error>,
    {
        let range = range.with_unit(bus.unit_id());
        Ok(decoder(&bus.read_range(&range)?)?)
    }

    /// Writes the four control values to [`proto::WRITE_RANGE`] in one request.
    ///
    /// # Errors
    ///
    /// * `tokio_modbus::Error` for transport failures and timeouts.
    /// * `tokio_modbus::ExceptionCode` if the PLC rejected the write.
    pub fn write_control_values<B: RegisterBus + ?Sized>(
        bus: &mut B,
        values: &proto::ControlValues,
    ) -> Result<()> {
        let range = proto::WRITE_RANGE.with_unit(bus.unit_id());
        bus.write_range(&range, values.as_slice())
    }

    /// Writes one control value with a single-register request.
    ///
    /// # Errors
    ///
    /// * `proto::Error::InvalidControlValueCount` if `index` is not below
    ///   [`proto::ControlValues::QUANTITY`]. Nothing is sent in that case.
    /// * `tokio_modbus::Error` or `tokio_modbus::ExceptionCode` as for
    ///   [`Self::write_control_values`].
    pub fn write_control_value<B: RegisterBus + ?Sized>(
        bus: &mut B,
        index: usize,
        value: u16,
    ) -> Result<()> {
        let address = proto::ControlValues::register_address(index)?;
        bus.write_single(address, value)
    }

    /// Reads and decodes gate, motor and temperature registers.
    ///
    /// Unknown gate or motor codes do not fail; they are reported in
    /// [`proto::StatusBlock::warnings`].
    pub fn read_status<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<proto::StatusBlock> {
        Self::read_and_decode(
            bus,
            proto::STATUS_RANGE,
            proto::StatusBlock::decode_from_holding_registers,
        )
    }

    /// Reads the PLC real-time clock.
    pub fn read_clock<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<proto::DeviceTimestamp> {
        Self::read_and_decode(
            bus,
            proto::CLOCK_RANGE,
            proto::DeviceTimestamp::decode_from_holding_registers,
        )
    }

    /// Reads the product identifier of the finished part.
    ///
    /// # Errors
    ///
    /// * `proto::Error::NonAscii` if the registers do not hold ASCII text.
    pub fn read_product_code<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<String> {
        Self::read_and_decode(
            bus,
            proto::IDENTIFIER_RANGE,
            proto::ProductCode::decode_from_holding_registers,
        )
    }
}
