//! Simulated FPGA streamer
//!
//! Behaves like the SPI-slave streamer: numbering starts at 1 and every
//! packet carries the reference payload. Faults can be injected to exercise
//! the verifier without hardware.

use crate::packet::{Packet, PACKET_BYTES, WORDS_PER_PAYLOAD};
use crate::reference::REFERENCE_PAYLOAD;
use crate::transport::Transport;
use crate::{LinkError, Result, SEQUENCE_RESET_VALUE};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Faults injected into the generated stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    /// Lose every Nth generated packet (N >= 2)
    pub drop_every: Option<u64>,
    /// Flip one payload bit in every Nth emitted packet
    pub corrupt_every: Option<u64>,
    /// Restart numbering at every transfer, as when chip select is re-asserted
    pub reset_per_transfer: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` below 2 disables dropping; losing every packet would never emit one
    pub fn drop_every(mut self, n: u64) -> Self {
        self.drop_every = (n > 1).then_some(n);
        self
    }

    pub fn corrupt_every(mut self, n: u64) -> Self {
        self.corrupt_every = (n > 0).then_some(n);
        self
    }

    pub fn reset_per_transfer(mut self, reset: bool) -> Self {
        self.reset_per_transfer = reset;
        self
    }

    pub fn is_clean(&self) -> bool {
        self.drop_every.is_none() && self.corrupt_every.is_none() && !self.reset_per_transfer
    }
}

enum Source {
    Counter { next_sequence: u32, generated: u64 },
    Script(VecDeque<Packet>),
}

/// In-memory [`Transport`] standing in for the FPGA
pub struct SimulatedStreamer {
    max_transfer_bytes: usize,
    faults: FaultPlan,
    source: Source,
    emitted: u64,
    transfers: u64,
}

impl SimulatedStreamer {
    /// Fault-free streamer
    pub fn new(max_transfer_bytes: usize) -> Self {
        Self::with_faults(max_transfer_bytes, FaultPlan::default())
    }

    pub fn with_faults(max_transfer_bytes: usize, faults: FaultPlan) -> Self {
        Self {
            max_transfer_bytes,
            faults,
            source: Source::Counter {
                next_sequence: SEQUENCE_RESET_VALUE,
                generated: 0,
            },
            emitted: 0,
            transfers: 0,
        }
    }

    /// Replay `packets` in order; a transfer asking for more than is left fails
    pub fn from_packets(max_transfer_bytes: usize, packets: Vec<Packet>) -> Self {
        Self {
            max_transfer_bytes,
            faults: FaultPlan::default(),
            source: Source::Script(packets.into()),
            emitted: 0,
            transfers: 0,
        }
    }

    /// Scripted stream with the reference payload and the given sequence numbers
    pub fn from_sequences(max_transfer_bytes: usize, sequences: &[u32]) -> Self {
        let packets = sequences
            .iter()
            .map(|&seq| Packet::new(seq, REFERENCE_PAYLOAD))
            .collect();
        Self::from_packets(max_transfer_bytes, packets)
    }

    /// Packets written into receive buffers so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    fn next_packet(&mut self) -> Option<Packet> {
        let packet = match &mut self.source {
            Source::Script(queue) => return queue.pop_front(),
            Source::Counter {
                next_sequence,
                generated,
            } => loop {
                let seq = *next_sequence;
                *next_sequence = next_sequence.wrapping_add(1);
                *generated += 1;

                let dropped = self
                    .faults
                    .drop_every
                    .is_some_and(|n| *generated % n == 0);
                if !dropped {
                    break Packet::new(seq, REFERENCE_PAYLOAD);
                }
            },
        };

        let mut packet = packet;
        let ordinal = self.emitted + 1;
        if self.faults.corrupt_every.is_some_and(|n| ordinal % n == 0) {
            let word = (ordinal as usize) % WORDS_PER_PAYLOAD;
            packet.payload.0[word] ^= 1u32 << (ordinal % 32);
        }
        Some(packet)
    }
}

impl Transport for SimulatedStreamer {
    fn max_transfer_bytes(&self) -> usize {
        self.max_transfer_bytes
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        if tx.len() != rx.len() {
            return Err(LinkError::BufferSizeMismatch {
                expected: rx.len(),
                actual: tx.len(),
            });
        }
        if rx.len() > self.max_transfer_bytes {
            return Err(LinkError::TransferTooLarge {
                length: rx.len(),
                max_bytes: self.max_transfer_bytes,
            });
        }
        if rx.len() % PACKET_BYTES != 0 {
            return Err(LinkError::PartialPacket {
                length: rx.len(),
                packet_bytes: PACKET_BYTES,
            });
        }

        let count = rx.len() / PACKET_BYTES;
        match &mut self.source {
            Source::Script(queue) if queue.len() < count => {
                return Err(LinkError::Transport(format!(
                    "simulated device has {} packets left, {} requested",
                    queue.len(),
                    count
                )));
            }
            Source::Counter { next_sequence, .. }
                if self.faults.reset_per_transfer && self.transfers > 0 =>
            {
                *next_sequence = SEQUENCE_RESET_VALUE;
            }
            _ => {}
        }

        for chunk in rx.chunks_exact_mut(PACKET_BYTES) {
            let packet = self
                .next_packet()
                .ok_or_else(|| LinkError::Transport("simulated device ran dry".to_string()))?;
            if let Ok(out) = <&mut [u8; PACKET_BYTES]>::try_from(chunk) {
                packet.write_bytes(out);
            }
            self.emitted += 1;
        }

        self.transfers += 1;
        debug!("Simulated transfer #{}: {} packets", self.transfers, count);
        Ok(())
    }
}
