//! Run events and the human-readable report
//!
//! The controller and verifier emit [`LinkEvent`]s into an [`EventSink`].
//! [`ConsoleReporter`] renders them as the link test report, filtered by
//! verbosity tier:
//!
//! | Tier | Adds                                  |
//! |------|---------------------------------------|
//! | 0    | run start, halts, final summary       |
//! | 1    | sequence errors, corrupted packets    |
//! | 2    | one line per burst, sequence resets   |
//! | 3    | one line per packet                   |
//! | 4    | raw word dump of every packet         |

use crate::controller::RunState;
use crate::packet::{Packet, Payload};
use crate::transport::LinkInfo;
use crate::verify::{HaltPolicy, PacketVerdict, SequenceCheck, SessionCounters};
use crate::{LinkError, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Structured record of something that happened during a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum LinkEvent {
    RunStarted {
        burst_capacity: usize,
        max_transfer_bytes: usize,
        packets_requested: Option<u64>,
    },
    BurstStarted {
        packets_left: Option<u64>,
        next_expected: u32,
        packets: usize,
    },
    PacketReceived {
        number: u64,
        packet: Packet,
        reference: Payload,
    },
    SequenceReset {
        number: u64,
        expected: u32,
        received: u32,
    },
    SequenceError {
        number: u64,
        expected: u32,
        received: u32,
    },
    Corruption {
        number: u64,
        sequence: u32,
        mismatched_words: usize,
    },
    Halted {
        verdict: PacketVerdict,
        packet: Packet,
        reference: Payload,
    },
    Interrupted {
        packets_read: u64,
    },
    Summary(RunSummary),
}

/// Receiver of run events
pub trait EventSink {
    fn emit(&mut self, event: &LinkEvent);

    /// Whether per-packet `PacketReceived` events are wanted at all
    fn wants_packets(&self) -> bool {
        true
    }
}

/// Sink that keeps every event, for inspection after the run
#[derive(Debug, Default)]
pub struct EventLog {
    pub events: Vec<LinkEvent>,
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &LinkEvent) {
        self.events.push(event.clone());
    }
}

/// Report detail tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verbosity {
    Summary,
    #[default]
    Errors,
    Bursts,
    Packets,
    Raw,
}

impl Verbosity {
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Verbosity::Summary),
            1 => Ok(Verbosity::Errors),
            2 => Ok(Verbosity::Bursts),
            3 => Ok(Verbosity::Packets),
            4 => Ok(Verbosity::Raw),
            other => Err(LinkError::InvalidConfig(format!(
                "verbosity must be 0-4, got {}",
                other
            ))),
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }
}

/// Settings a run was made with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    /// `None` when running until interrupted
    pub packets_requested: Option<u64>,
    pub halt: HaltPolicy,
    /// Effective ceiling after capping by the transport
    pub max_transfer_bytes: usize,
    /// Packets per burst
    pub burst_capacity: usize,
    pub link: Option<LinkInfo>,
}

/// Final counters and timing of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub state: RunState,
    pub config: RunParameters,
    pub packets_read: u64,
    pub sequence_errors: u64,
    pub sequence_resets: u64,
    pub corruption_errors: u64,
    pub elapsed_us: u64,
    pub us_per_packet: f64,
    pub generated_at: String,
}

impl RunSummary {
    pub fn new(
        state: RunState,
        counters: &SessionCounters,
        config: RunParameters,
        elapsed: Duration,
    ) -> Self {
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        let us_per_packet = if counters.packets_read > 0 {
            elapsed.as_secs_f64() * 1_000_000.0 / counters.packets_read as f64
        } else {
            0.0
        };

        Self {
            state,
            config,
            packets_read: counters.packets_read,
            sequence_errors: counters.sequence_errors,
            sequence_resets: counters.sequence_resets,
            corruption_errors: counters.corruption_errors,
            elapsed_us,
            us_per_packet,
            generated_at: Utc::now().to_rfc3339(),
        }
    }

    /// Write as pretty JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Renders the test report to a writer (normally stdout)
pub struct ConsoleReporter<W: Write> {
    out: W,
    verbosity: Verbosity,
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W, verbosity: Verbosity) -> Self {
        Self { out, verbosity }
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &LinkEvent) -> std::io::Result<()> {
        let v = self.verbosity;
        match event {
            LinkEvent::RunStarted {
                burst_capacity,
                max_transfer_bytes,
                ..
            } => writeln!(
                self.out,
                "Starting packet loop | Burst count: {} | Max kernel XFER buffer size: {}",
                burst_capacity, max_transfer_bytes
            ),
            LinkEvent::BurstStarted {
                packets_left,
                next_expected,
                ..
            } if v >= Verbosity::Bursts => match packets_left {
                Some(left) => writeln!(
                    self.out,
                    "-Burst: Packets left: {} | Next seq: {}",
                    left, next_expected
                ),
                None => writeln!(
                    self.out,
                    "-Burst: Packets left: unbounded | Next seq: {}",
                    next_expected
                ),
            },
            LinkEvent::PacketReceived {
                number,
                packet,
                reference,
            } if v >= Verbosity::Packets => {
                writeln!(self.out, "--Packet #{:9} | SEQ:{:9}", number, packet.sequence)?;
                if v >= Verbosity::Raw {
                    write_packet_dump(&mut self.out, packet, reference)?;
                }
                Ok(())
            }
            LinkEvent::SequenceReset {
                expected, received, ..
            } if v >= Verbosity::Bursts => writeln!(
                self.out,
                "WARN: SEQ reset! Expected:{} Received:{}",
                expected, received
            ),
            LinkEvent::SequenceError {
                expected, received, ..
            } if v >= Verbosity::Errors => writeln!(
                self.out,
                "ERROR: SEQ expected:{} Received:{}",
                expected, received
            ),
            LinkEvent::Corruption {
                number,
                sequence,
                mismatched_words,
            } if v >= Verbosity::Errors => writeln!(
                self.out,
                "ERROR: Packet #{} corrupted! SEQ:{} ({} words differ)",
                number, sequence, mismatched_words
            ),
            LinkEvent::Halted {
                verdict,
                packet,
                reference,
            } => {
                let reason = if matches!(verdict.sequence, SequenceCheck::Gap { .. }) {
                    "SEQ"
                } else {
                    "DATA"
                };
                writeln!(self.out, "Halting on {} error", reason)?;
                write_packet_dump(&mut self.out, packet, reference)
            }
            LinkEvent::Interrupted { packets_read } => {
                writeln!(self.out, "Interrupted after {} packets", packets_read)
            }
            LinkEvent::Summary(summary) => write_summary(&mut self.out, summary),
            _ => Ok(()),
        }
    }
}

impl<W: Write> EventSink for ConsoleReporter<W> {
    fn emit(&mut self, event: &LinkEvent) {
        if let Err(e) = self.write_event(event) {
            warn!("Report output failed: {}", e);
        }
    }

    fn wants_packets(&self) -> bool {
        self.verbosity() >= Verbosity::Packets
    }
}

/// Side-by-side dump of received words and the reference words
pub fn write_packet_dump<W: Write>(
    out: &mut W,
    packet: &Packet,
    reference: &Payload,
) -> std::io::Result<()> {
    writeln!(out, "    RX       Expected")?;
    writeln!(out, "    =======  ========")?;
    writeln!(out, " SQ-{:08X} xxxxxxxx", packet.sequence)?;
    for (i, (rx, expected)) in packet
        .payload
        .words()
        .iter()
        .zip(reference.words().iter())
        .enumerate()
    {
        let marker = if rx != expected { " <" } else { "" };
        writeln!(out, " {:02}-{:08X} {:08X}{}", i, rx, expected, marker)?;
    }
    writeln!(out)
}

/// Final report; every category is stated explicitly, zero or not
pub fn write_summary<W: Write>(out: &mut W, summary: &RunSummary) -> std::io::Result<()> {
    if summary.sequence_errors > 0 {
        writeln!(out, "ERRORS: {} bad seq packets!", summary.sequence_errors)?;
    } else {
        writeln!(out, "No missed sequences")?;
    }

    if summary.corruption_errors > 0 {
        writeln!(out, "ERRORS: {} corrupted packets!", summary.corruption_errors)?;
    } else {
        writeln!(out, "No corrupt packets")?;
    }

    if summary.sequence_resets > 0 {
        writeln!(out, "WARN: {} SEQ resets!", summary.sequence_resets)?;
    } else {
        writeln!(out, "No SEQ resets")?;
    }

    writeln!(
        out,
        "Total time {} us || {} packets | {:.3} us/packet",
        summary.elapsed_us, summary.packets_read, summary.us_per_packet
    )
}
