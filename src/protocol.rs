//! Register map and field decoding rules of the line PLC.
//!
//! The PLC exposes its machine state as holding registers. This module names
//! the fixed address ranges used by the supervisory side and turns the raw
//! 16-bit words of each range into typed values. Everything in here is pure:
//! no I/O, no state between calls.
//!
//! The addresses and offsets are the memory map of one specific PLC program.
//! They are kept as an opaque, fixed table and are not derived from anything.

use std::fmt;

/// Errors raised while validating or decoding register data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A register range must contain at least one register.
    #[error("A register range must contain at least one register")]
    EmptyRange,

    /// The register range does not fit into the 16-bit address space.
    #[error("Register range starting at {start_address} with {count} registers exceeds the address space")]
    RangeOverflow { start_address: u16, count: u16 },

    /// The device returned a different number of registers than requested.
    #[error("Expected {expected} registers, got {actual}")]
    UnexpectedRegisterCount { expected: usize, actual: usize },

    /// The number of control values does not match the write range.
    #[error("Expected {expected} control values, got {actual}")]
    InvalidControlValueCount { expected: usize, actual: usize },

    /// A control value does not fit into a 16-bit register.
    #[error("Control value {value} at index {index} is outside of 0..=65535")]
    ControlValueOutOfRange { index: usize, value: i64 },

    /// The product identifier contains a byte outside of the ASCII range.
    #[error("Product identifier contains non-ASCII byte 0x{byte:02X} at position {position}")]
    NonAscii { position: usize, byte: u8 },

    /// The product identifier does not fit into the identifier registers.
    #[error("Product identifier of {length} bytes exceeds {max} bytes")]
    IdentifierTooLong { length: usize, max: usize },
}

impl Error {
    /// A short machine readable reason for the error.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::EmptyRange | Error::RangeOverflow { .. } => "invalid_range",
            Error::UnexpectedRegisterCount { .. } => "unexpected_length",
            Error::InvalidControlValueCount { .. } => "invalid_length",
            Error::ControlValueOutOfRange { .. } => "invalid_value",
            Error::NonAscii { .. } => "non_ascii",
            Error::IdentifierTooLong { .. } => "too_long",
        }
    }
}

/// The unit (slave) id the PLC answers on by default.
pub const DEFAULT_UNIT_ID: u8 = 0x01;
/// The standard Modbus TCP port.
pub const DEFAULT_PORT: u16 = 502;

/// A contiguous block of holding registers on one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRange {
    pub start_address: u16,
    pub count: u16,
    pub unit_id: u8,
}

impl RegisterRange {
    /// Creates a validated register range.
    ///
    /// # Errors
    ///
    /// * [`Error::EmptyRange`] if `count` is zero.
    /// * [`Error::RangeOverflow`] if the last register lies beyond address `0xFFFF`.
    pub const fn new(start_address: u16, count: u16, unit_id: u8) -> Result<Self, Error> {
        if count == 0 {
            return Err(Error::EmptyRange);
        }
        if start_address as u32 + count as u32 > u16::MAX as u32 + 1 {
            return Err(Error::RangeOverflow {
                start_address,
                count,
            });
        }
        Ok(Self {
            start_address,
            count,
            unit_id,
        })
    }

    /// The same range addressed on another unit.
    pub const fn with_unit(self, unit_id: u8) -> Self {
        Self { unit_id, ..self }
    }

    /// The number of registers as `usize`.
    pub const fn len(&self) -> usize {
        self.count as usize
    }

    /// Always `false`, ranges are never empty.
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl fmt::Display for RegisterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}..{} (unit {})",
            self.start_address,
            self.start_address as u32 + self.count as u32,
            self.unit_id
        )
    }
}

const fn fixed_range(start_address: u16, count: u16) -> RegisterRange {
    RegisterRange {
        start_address,
        count,
        unit_id: DEFAULT_UNIT_ID,
    }
}

/// Control registers written at the start of every transaction.
pub const WRITE_RANGE: RegisterRange = fixed_range(70, ControlValues::QUANTITY as u16);
/// Gate, motor and temperature registers.
pub const STATUS_RANGE: RegisterRange = fixed_range(0, 30);
/// The real-time clock of the PLC.
pub const CLOCK_RANGE: RegisterRange = fixed_range(90, 7);
/// The byte-swapped ASCII product identifier.
pub const IDENTIFIER_RANGE: RegisterRange = fixed_range(100, 10);

/// Names the register groups a transaction touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RangeKind {
    Write,
    Status,
    Clock,
    Identifier,
}

impl RangeKind {
    /// The fixed register range of this group on the default unit.
    pub const fn range(&self) -> RegisterRange {
        match self {
            RangeKind::Write => WRITE_RANGE,
            RangeKind::Status => STATUS_RANGE,
            RangeKind::Clock => CLOCK_RANGE,
            RangeKind::Identifier => IDENTIFIER_RANGE,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            RangeKind::Write => "write",
            RangeKind::Status => "status",
            RangeKind::Clock => "clock",
            RangeKind::Identifier => "identifier",
        }
    }
}

impl fmt::Display for RangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn check_register_count(words: &[u16], range: &RegisterRange) -> Result<(), Error> {
    if words.len() != range.len() {
        return Err(Error::UnexpectedRegisterCount {
            expected: range.len(),
            actual: words.len(),
        });
    }
    Ok(())
}

/// The four control values written to [`WRITE_RANGE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlValues([u16; ControlValues::QUANTITY]);

impl ControlValues {
    pub const QUANTITY: usize = 4;

    pub const fn new(values: [u16; Self::QUANTITY]) -> Self {
        Self(values)
    }

    /// Validates loosely typed integers coming from an outer layer.
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidControlValueCount`] unless exactly four values are given.
    /// * [`Error::ControlValueOutOfRange`] for the first value outside of `0..=65535`.
    pub fn from_ints(values: &[i64]) -> Result<Self, Error> {
        if values.len() != Self::QUANTITY {
            return Err(Error::InvalidControlValueCount {
                expected: Self::QUANTITY,
                actual: values.len(),
            });
        }
        let mut words = [0u16; Self::QUANTITY];
        for (index, (word, value)) in words.iter_mut().zip(values).enumerate() {
            *word = u16::try_from(*value).map_err(|_| Error::ControlValueOutOfRange {
                index,
                value: *value,
            })?;
        }
        Ok(Self(words))
    }

    /// The register offset of a single control value inside [`WRITE_RANGE`].
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidControlValueCount`] if `index` is not a control register.
    pub fn register_address(index: usize) -> Result<u16, Error> {
        if index >= Self::QUANTITY {
            return Err(Error::InvalidControlValueCount {
                expected: Self::QUANTITY,
                actual: index + 1,
            });
        }
        Ok(WRITE_RANGE.start_address + index as u16)
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

impl TryFrom<&[u16]> for ControlValues {
    type Error = Error;

    fn try_from(values: &[u16]) -> Result<Self, Self::Error> {
        let words: [u16; Self::QUANTITY] =
            values
                .try_into()
                .map_err(|_| Error::InvalidControlValueCount {
                    expected: Self::QUANTITY,
                    actual: values.len(),
                })?;
        Ok(Self(words))
    }
}

impl fmt::Display for ControlValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "[{a}, {b}, {c}, {d}]")
    }
}

/// A raw value that did not match any known code and was replaced by a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DecodeWarning {
    /// Register offset inside the decoded range.
    pub offset: u16,
    /// The raw register value.
    pub raw: u16,
    pub field: &'static str,
}

impl fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unknown {} code {} at offset {}",
            self.field, self.raw, self.offset
        )
    }
}

/// Position of a material gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[repr(u16)]
pub enum GateState {
    #[default]
    Indeterminate = 0,
    Closed = 1,
    Open = 2,
}

impl GateState {
    /// Decodes a gate register. Unknown codes become [`GateState::Indeterminate`]
    /// together with a warning.
    pub fn decode(offset: u16, value: u16) -> (Self, Option<DecodeWarning>) {
        match value {
            0 => (GateState::Indeterminate, None),
            1 => (GateState::Closed, None),
            2 => (GateState::Open, None),
            raw => (
                GateState::Indeterminate,
                Some(DecodeWarning {
                    offset,
                    raw,
                    field: "gate",
                }),
            ),
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Indeterminate => write!(f, "indeterminate"),
            GateState::Closed => write!(f, "closed"),
            GateState::Open => write!(f, "open"),
        }
    }
}

/// Decoded content of [`STATUS_RANGE`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatusBlock {
    /// Inlet gate 1, inlet gate 2 and the discharge gate.
    pub gate_states: [GateState; 3],
    pub motor_on: bool,
    pub motor_speed: u16,
    /// Inlet 1, inlet 2 and discharge temperature, as reported by the PLC.
    pub temperatures: [u16; 3],
    pub warnings: Vec<DecodeWarning>,
}

impl StatusBlock {
    pub const QUANTITY: u16 = STATUS_RANGE.count;

    pub const GATE_OFFSETS: [usize; 3] = [0, 1, 2];
    pub const MOTOR_ON_OFFSET: usize = 10;
    pub const MOTOR_SPEED_OFFSET: usize = 12;
    pub const TEMPERATURE_OFFSETS: [usize; 3] = [20, 22, 24];

    /// Extracts the status fields from a block of [`Self::QUANTITY`] registers.
    ///
    /// # Errors
    ///
    /// * [`Error::UnexpectedRegisterCount`] if `words` has the wrong length.
    pub fn decode_from_holding_registers(words: &[u16]) -> Result<Self, Error> {
        check_register_count(words, &STATUS_RANGE)?;
        let mut warnings = Vec::new();

        let gate_states = Self::GATE_OFFSETS.map(|offset| {
            let (state, warning) = GateState::decode(offset as u16, words[offset]);
            warnings.extend(warning);
            state
        });

        let motor_on = match words[Self::MOTOR_ON_OFFSET] {
            0 => false,
            1 => true,
            raw => {
                warnings.push(DecodeWarning {
                    offset: Self::MOTOR_ON_OFFSET as u16,
                    raw,
                    field: "motor state",
                });
                false
            }
        };

        Ok(Self {
            gate_states,
            motor_on,
            motor_speed: words[Self::MOTOR_SPEED_OFFSET],
            temperatures: Self::TEMPERATURE_OFFSETS.map(|offset| words[offset]),
            warnings,
        })
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl fmt::Display for StatusBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [inlet1, inlet2, discharge] = self.gate_states;
        let [t1, t2, t3] = self.temperatures;
        write!(
            f,
            "gates inlet1={inlet1} inlet2={inlet2} discharge={discharge}, motor {} at {}, temperatures {t1}/{t2}/{t3}",
            if self.motor_on { "on" } else { "off" },
            self.motor_speed
        )
    }
}

/// The PLC real-time clock, copied field by field without calendar validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceTimestamp {
    pub year: u16,
    pub month: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub sub_second: u16,
}

impl DeviceTimestamp {
    /// # Errors
    ///
    /// * [`Error::UnexpectedRegisterCount`] if `words` has the wrong length.
    pub fn decode_from_holding_registers(words: &[u16]) -> Result<Self, Error> {
        check_register_count(words, &CLOCK_RANGE)?;
        Ok(Self {
            year: words[0],
            month: words[1],
            day: words[2],
            hour: words[3],
            minute: words[4],
            second: words[5],
            sub_second: words[6],
        })
    }
}

impl fmt::Display for DeviceTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.sub_second
        )
    }
}

/// The product identifier stored in [`IDENTIFIER_RANGE`].
pub struct ProductCode;

impl ProductCode {
    /// Two ASCII characters per register.
    pub const MAX_LEN: usize = IDENTIFIER_RANGE.len() * 2;

    /// # Errors
    ///
    /// * [`Error::UnexpectedRegisterCount`] if `words` has the wrong length.
    /// * [`Error::NonAscii`] if a byte outside of the ASCII range is found.
    pub fn decode_from_holding_registers(words: &[u16]) -> Result<String, Error> {
        check_register_count(words, &IDENTIFIER_RANGE)?;
        decode_identifier(words)
    }
}

/// Decodes ASCII text stored with the low byte first in each register.
///
/// The PLC stores this field in the opposite byte order of its numeric
/// registers. Each word is swapped, the swapped words are laid out big-endian
/// and trailing NUL bytes and whitespace are stripped. Do not use this on any
/// other range.
///
/// Whitespace is what [`str::trim_end`] strips. The ASCII separator controls
/// `0x1C` to `0x1F` are kept, unlike in Python's `str.rstrip()`.
///
/// # Errors
///
/// * [`Error::NonAscii`] for the first byte above `0x7F`.
pub fn decode_identifier(words: &[u16]) -> Result<String, Error> {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.swap_bytes().to_be_bytes())
        .collect();
    if let Some(position) = bytes.iter().position(|byte| !byte.is_ascii()) {
        return Err(Error::NonAscii {
            position,
            byte: bytes[position],
        });
    }
    let text: String = bytes.iter().map(|&byte| char::from(byte)).collect();
    Ok(text.trim_end_matches('\0').trim_end().to_string())
}

/// Encodes ASCII text into byte-swapped identifier registers, padding with NUL.
///
/// # Errors
///
/// * [`Error::NonAscii`] if `text` is not ASCII.
/// * [`Error::IdentifierTooLong`] if `text` does not fit into [`IDENTIFIER_RANGE`].
pub fn encode_identifier(text: &str) -> Result<[u16; IDENTIFIER_RANGE.len()], Error> {
    let bytes = text.as_bytes();
    if let Some(position) = bytes.iter().position(|byte| !byte.is_ascii()) {
        return Err(Error::NonAscii {
            position,
            byte: bytes[position],
        });
    }
    if bytes.len() > ProductCode::MAX_LEN {
        return Err(Error::IdentifierTooLong {
            length: bytes.len(),
            max: ProductCode::MAX_LEN,
        });
    }
    let mut words = [0u16; IDENTIFIER_RANGE.len()];
    for (word, pair) in words.iter_mut().zip(bytes.chunks(2)) {
        let high = pair[0];
        let low = pair.get(1).copied().unwrap_or(0);
        *word = u16::from_be_bytes([high, low]).swap_bytes();
    }
    Ok(words)
}

/// The decoded machine state of one fully successful transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Snapshot {
    pub gate_states: [GateState; 3],
    pub motor_on: bool,
    pub motor_speed: u16,
    pub temperatures: [u16; 3],
    pub timestamp: DeviceTimestamp,
    pub product_code: String,
}

impl Snapshot {
    pub fn new(status: &StatusBlock, timestamp: DeviceTimestamp, product_code: &str) -> Self {
        Self {
            gate_states: status.gate_states,
            motor_on: status.motor_on,
            motor_speed: status.motor_speed,
            temperatures: status.temperatures,
            timestamp,
            product_code: product_code.to_string(),
        }
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [g1, g2, g3] = self.gate_states;
        let [t1, t2, t3] = self.temperatures;
        write!(
            f,
            "product {} at {}: gates {g1}/{g2}/{g3}, motor {} at {}, temperatures {t1}/{t2}/{t3}",
            self.product_code,
            self.timestamp,
            if self.motor_on { "on" } else { "off" },
            self.motor_speed
        )
    }
}
