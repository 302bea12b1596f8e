//! Burst planning and execution
//!
//! A burst is one spidev transaction carrying whole packets only. Bigger
//! bursts are cheaper (fewer ioctls, DMA kicks in) so the planner packs as
//! many packets as the transaction ceiling allows.

use crate::packet::{Packet, PACKET_BYTES};
use crate::transport::Transport;
use crate::{LinkError, Result};
use tracing::trace;

/// Whole packets that fit into one transaction
pub fn burst_capacity(packet_bytes: usize, max_bytes: usize) -> Result<usize> {
    if packet_bytes == 0 {
        return Err(LinkError::InvalidConfig(
            "packet size must be greater than 0".to_string(),
        ));
    }
    if packet_bytes > max_bytes {
        return Err(LinkError::PacketTooLarge {
            packet_bytes,
            max_bytes,
        });
    }
    Ok(max_bytes / packet_bytes)
}

/// Packets to request in the next burst
///
/// Returns `min(remaining, max_bytes / packet_bytes)`, which is at least 1
/// whenever packets remain and 0 only when `remaining` is 0.
pub fn plan_burst(remaining: u64, packet_bytes: usize, max_bytes: usize) -> Result<usize> {
    let capacity = burst_capacity(packet_bytes, max_bytes)?;
    Ok(next_burst(Some(remaining), capacity))
}

/// Burst size from a precomputed capacity. `None` means unbounded.
pub(crate) fn next_burst(remaining: Option<u64>, capacity: usize) -> usize {
    match remaining {
        Some(left) => usize::try_from(left).map_or(capacity, |left| left.min(capacity)),
        None => capacity,
    }
}

/// Transmit filler and receive storage for one burst
///
/// The receive side is overwritten wholesale by every transfer.
pub struct PacketBuffer {
    tx: Vec<u8>,
    rx: Vec<u8>,
    capacity: usize,
    filled: usize,
}

impl PacketBuffer {
    /// Allocate room for `capacity` packets on both sides
    ///
    /// Allocation failure is reported as a configuration error.
    pub fn new(capacity: usize) -> Result<Self> {
        let bytes = capacity.checked_mul(PACKET_BYTES).ok_or_else(|| {
            LinkError::InvalidConfig(format!("burst of {} packets overflows", capacity))
        })?;

        Ok(Self {
            // link is receive-only, the filler content is don't-care
            tx: zeroed(bytes)?,
            rx: zeroed(bytes)?,
            capacity,
            filled: 0,
        })
    }

    /// Capacity in packets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Packets received by the last successful burst
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// Decoded packets of the last successful burst, in arrival order
    pub fn packets(&self) -> impl Iterator<Item = Packet> + '_ {
        self.rx[..self.filled * PACKET_BYTES]
            .chunks_exact(PACKET_BYTES)
            .filter_map(|chunk| <&[u8; PACKET_BYTES]>::try_from(chunk).ok())
            .map(Packet::from_bytes)
    }
}

fn zeroed(bytes: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(bytes).map_err(|e| {
        LinkError::InvalidConfig(format!("cannot allocate {} byte burst buffer: {}", bytes, e))
    })?;
    buf.resize(bytes, 0);
    Ok(buf)
}

/// Run one transaction that receives exactly `count` packets into `buffer`
///
/// There is no partial success: on error the buffer holds no packets.
pub fn execute_burst<T: Transport + ?Sized>(
    transport: &mut T,
    buffer: &mut PacketBuffer,
    count: usize,
) -> Result<usize> {
    buffer.filled = 0;

    if count > buffer.capacity {
        return Err(LinkError::BufferSizeMismatch {
            expected: buffer.capacity,
            actual: count,
        });
    }

    let length = count * PACKET_BYTES;
    let ceiling = transport.max_transfer_bytes();
    if length > ceiling {
        return Err(LinkError::TransferTooLarge {
            length,
            max_bytes: ceiling,
        });
    }

    trace!("Transfer of {} packets ({} bytes)", count, length);
    transport.transfer(&buffer.tx[..length], &mut buffer.rx[..length])?;
    buffer.filled = count;

    Ok(count)
}
