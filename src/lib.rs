//! A library for the register interface of a production line PLC via Modbus TCP.
//!
//! The PLC takes four control values and exposes its machine state (gate
//! positions, motor status, temperatures, its real-time clock and the ASCII
//! identifier of the finished product) as holding registers. This crate maps
//! those registers to typed values and runs the write-then-read transaction
//! the supervisory application needs.
//!
//! The crate is organised in layers:
//!
//! 1.  **Register map and decoding**: [`protocol`] holds the fixed address
//!     ranges and pure decode functions for each of them.
//! 2.  **Sessions and register operations**: [`session::Session`] owns one
//!     connection; [`tokio_sync::LinePlc`] reads and writes the register groups
//!     over any [`session::RegisterBus`].
//! 3.  **Transactions**: [`transaction::operate`] connects, writes, reads all
//!     groups and always returns a [`transaction::TransactionResult`], with
//!     every step succeeding or failing on its own.
//! 4.  **Shared access**: [`tokio_sync_safe_client::SafeClient`] serializes
//!     transactions from several threads against one device.
//!
//! ## Quick Start
//!
//! ```no_run
//! use lineplc_lib::{tokio_common::ConnectionConfig, transaction};
//!
//! let config = ConnectionConfig::new("192.168.5.1", 502);
//! let result = transaction::operate(&config, &[1, 1, 1, 1]);
//!
//! match result.snapshot() {
//!     Some(snapshot) => println!("{snapshot}"),
//!     None => print!("{result}"),
//! }
//! ```

pub mod protocol;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod session;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod transaction;

#[cfg_attr(docsrs, doc(cfg(feature = "safe-client-sync")))]
#[cfg(feature = "safe-client-sync")]
pub mod tokio_sync_safe_client;
