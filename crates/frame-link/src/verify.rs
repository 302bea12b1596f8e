//! Packet verification
//!
//! Each packet is checked twice, independently:
//!
//! 1. **Sequence**: compared with the expected number. A mismatch of exactly
//!    [`SEQUENCE_RESET_VALUE`] is a reset (the FPGA restarted numbering after
//!    chip select was re-asserted). Any other mismatch is a sequence error.
//!    Either way tracking resynchronises to the observed number.
//! 2. **Payload**: compared word for word with the reference payload.
//!
//! Resets are informational. Sequence errors and corruption are faults and
//! stop the burst when the halt policy is enabled.

use crate::packet::{Packet, Payload};
use crate::reference::REFERENCE_PAYLOAD;
use crate::report::{EventSink, LinkEvent};
use crate::SEQUENCE_RESET_VALUE;
use serde::{Deserialize, Serialize};

/// Cumulative error counters for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub sequence_errors: u64,
    pub sequence_resets: u64,
    pub corruption_errors: u64,
    pub next_expected_sequence: u32,
    pub packets_read: u64,
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self {
            sequence_errors: 0,
            sequence_resets: 0,
            corruption_errors: 0,
            // FPGA is reset before every run
            next_expected_sequence: SEQUENCE_RESET_VALUE,
            packets_read: 0,
        }
    }
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any sequence error or corrupted packet seen
    pub fn has_faults(&self) -> bool {
        self.sequence_errors > 0 || self.corruption_errors > 0
    }
}

/// Outcome of the sequence check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceCheck {
    InOrder,
    /// Far end restarted numbering
    Reset { expected: u32 },
    /// Packets lost or duplicated
    Gap { expected: u32 },
}

/// Result of checking one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketVerdict {
    pub sequence: SequenceCheck,
    pub corrupted: bool,
}

impl PacketVerdict {
    /// True sequence error or corruption; resets never count
    pub fn is_fault(&self) -> bool {
        self.corrupted || matches!(self.sequence, SequenceCheck::Gap { .. })
    }
}

/// Whether a fault ends the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HaltPolicy {
    #[default]
    Continue,
    HaltOnError,
}

impl HaltPolicy {
    pub fn from_flag(halt: bool) -> Self {
        if halt {
            HaltPolicy::HaltOnError
        } else {
            HaltPolicy::Continue
        }
    }
}

/// Result of verifying one burst
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BurstOutcome {
    /// Every packet was examined
    Continue,
    /// Halt policy fired; later packets were not examined
    Halted { packet: Packet, verdict: PacketVerdict },
}

/// Check one packet and update `counters`
pub fn check_packet(
    counters: &mut SessionCounters,
    packet: &Packet,
    reference: &Payload,
) -> PacketVerdict {
    counters.packets_read += 1;

    let expected = counters.next_expected_sequence;
    let sequence = if packet.sequence == expected {
        SequenceCheck::InOrder
    } else if packet.sequence == SEQUENCE_RESET_VALUE {
        counters.sequence_resets += 1;
        SequenceCheck::Reset { expected }
    } else {
        counters.sequence_errors += 1;
        SequenceCheck::Gap { expected }
    };
    counters.next_expected_sequence = packet.sequence.wrapping_add(1);

    let corrupted = packet.payload != *reference;
    if corrupted {
        counters.corruption_errors += 1;
    }

    PacketVerdict {
        sequence,
        corrupted,
    }
}

/// Correctness oracle for received bursts
#[derive(Debug, Clone)]
pub struct Verifier {
    reference: Payload,
    halt: HaltPolicy,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new(HaltPolicy::Continue)
    }
}

impl Verifier {
    pub fn new(halt: HaltPolicy) -> Self {
        Self {
            reference: REFERENCE_PAYLOAD,
            halt,
        }
    }

    pub fn with_reference(mut self, reference: Payload) -> Self {
        self.reference = reference;
        self
    }

    pub fn reference(&self) -> &Payload {
        &self.reference
    }

    pub fn halt_policy(&self) -> HaltPolicy {
        self.halt
    }

    /// Verify packets in arrival order, reporting every anomaly to `sink`
    pub fn verify_burst<I, S>(
        &self,
        counters: &mut SessionCounters,
        packets: I,
        sink: &mut S,
    ) -> BurstOutcome
    where
        I: IntoIterator<Item = Packet>,
        S: EventSink + ?Sized,
    {
        let per_packet = sink.wants_packets();
        for packet in packets {
            let verdict = check_packet(counters, &packet, &self.reference);
            let number = counters.packets_read;

            if per_packet {
                sink.emit(&LinkEvent::PacketReceived {
                    number,
                    packet,
                    reference: self.reference,
                });
            }

            match verdict.sequence {
                SequenceCheck::InOrder => {}
                SequenceCheck::Reset { expected } => sink.emit(&LinkEvent::SequenceReset {
                    number,
                    expected,
                    received: packet.sequence,
                }),
                SequenceCheck::Gap { expected } => sink.emit(&LinkEvent::SequenceError {
                    number,
                    expected,
                    received: packet.sequence,
                }),
            }
            if verdict.corrupted {
                sink.emit(&LinkEvent::Corruption {
                    number,
                    sequence: packet.sequence,
                    mismatched_words: packet.payload.mismatched_words(&self.reference).count(),
                });
            }

            if self.halt == HaltPolicy::HaltOnError && verdict.is_fault() {
                sink.emit(&LinkEvent::Halted {
                    verdict,
                    packet,
                    reference: self.reference,
                });
                return BurstOutcome::Halted { packet, verdict };
            }
        }
        BurstOutcome::Continue
    }
}
