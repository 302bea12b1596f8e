//! FPGA SPI Frame Link
//!
//! Burst planning, burst transfer and packet verification for the Artix-7
//! SPI-slave frame streamer. The FPGA emits fixed-size packets back to back:
//!
//! ```text
//! | seq (u32) | payload word 0 | payload word 1 | ... | payload word 22 |
//! ```
//!
//! The host pulls as many whole packets as fit into one spidev transaction,
//! then checks every packet for two independent faults:
//!
//! | Check    | Fault              | Counter             | Halts |
//! |----------|--------------------|---------------------|-------|
//! | sequence | gap or duplicate   | `sequence_errors`   | yes   |
//! | sequence | restart at 1       | `sequence_resets`   | no    |
//! | payload  | word mismatch      | `corruption_errors` | yes   |
//!
//! Halting only happens when the halt policy is enabled. The run controller
//! owns all state; the verifier only mutates the counters it is handed.

use thiserror::Error;

pub mod burst;
pub mod controller;
pub mod packet;
pub mod reference;
pub mod report;
pub mod sim;
pub mod transport;
pub mod verify;

pub use burst::{burst_capacity, plan_burst, PacketBuffer};
pub use controller::{RunConfig, RunController, RunOutcome, RunState};
pub use packet::{Packet, Payload, PACKET_BYTES, WORDS_PER_PAYLOAD};
pub use reference::REFERENCE_PAYLOAD;
pub use report::{
    ConsoleReporter, EventLog, EventSink, LinkEvent, RunParameters, RunSummary, Verbosity,
};
pub use sim::{FaultPlan, SimulatedStreamer};
pub use transport::{LinkInfo, SpiMode, SpiSettings, Transport};
pub use verify::{HaltPolicy, PacketVerdict, SequenceCheck, SessionCounters, Verifier};

/// Default spidev transaction ceiling in bytes (`/sys/module/spidev/parameters/bufsiz`)
pub const DEFAULT_MAX_TRANSFER_BYTES: usize = 4096;

/// Largest transaction ceiling accepted from the command line or the driver
pub const MAX_TRANSFER_CEILING: usize = 1 << 24;

/// Sequence number the FPGA starts from after reset or a chip-select restart
pub const SEQUENCE_RESET_VALUE: u32 = 1;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Packet of {packet_bytes} bytes does not fit in a {max_bytes} byte transfer")]
    PacketTooLarge { packet_bytes: usize, max_bytes: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Transfer of {length} bytes exceeds the {max_bytes} byte ceiling")]
    TransferTooLarge { length: usize, max_bytes: usize },
    #[error("Transfer length {length} is not a whole number of {packet_bytes} byte packets")]
    PartialPacket { length: usize, packet_bytes: usize },
    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;
