//! Packet layout shared with the FPGA sender
//!
//! Every field is a 32-bit word. Word 0 is the sequence number, words 1..=23
//! are the payload. In the receive buffer each word occupies four bytes in
//! little-endian order, which is how the ECSPI controller on the i.MX host
//! lands 32-bit SPI words in memory.

use serde::{Deserialize, Serialize};

/// Payload words per packet. Must match the FPGA's `WORDS_PER_PAYLOAD`.
pub const WORDS_PER_PAYLOAD: usize = 23;

pub const BYTES_PER_WORD: usize = 4;

/// Words per packet including the sequence field
pub const WORDS_PER_PACKET: usize = WORDS_PER_PAYLOAD + 1;

pub const PAYLOAD_BYTES: usize = WORDS_PER_PAYLOAD * BYTES_PER_WORD;

pub const PACKET_BYTES: usize = WORDS_PER_PACKET * BYTES_PER_WORD;

pub const PACKET_BITS: usize = PACKET_BYTES * 8;

/// ECSPI hardware FIFO: 36 entries of 32 bits
pub const ECSPI_FIFO_BITS: usize = 32 * 36;

const _: () = assert!(
    PACKET_BITS <= ECSPI_FIFO_BITS,
    "packet must fit into the ECSPI hardware FIFO"
);

/// Fixed-length payload of a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload(pub [u32; WORDS_PER_PAYLOAD]);

impl Payload {
    pub const fn new(words: [u32; WORDS_PER_PAYLOAD]) -> Self {
        Self(words)
    }

    pub fn words(&self) -> &[u32; WORDS_PER_PAYLOAD] {
        &self.0
    }

    /// Indices of words that differ from `other`
    pub fn mismatched_words<'a>(&'a self, other: &'a Payload) -> impl Iterator<Item = usize> + 'a {
        self.0
            .iter()
            .zip(other.0.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
    }
}

/// One sequence-numbered record from the FPGA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub sequence: u32,
    pub payload: Payload,
}

impl Packet {
    pub fn new(sequence: u32, payload: Payload) -> Self {
        Self { sequence, payload }
    }

    /// Decode one packet from exactly `PACKET_BYTES` bytes
    pub fn from_bytes(bytes: &[u8; PACKET_BYTES]) -> Self {
        let mut words = bytes
            .chunks_exact(BYTES_PER_WORD)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]));

        let sequence = words.next().unwrap_or_default();
        let mut payload = [0u32; WORDS_PER_PAYLOAD];
        for (slot, word) in payload.iter_mut().zip(words) {
            *slot = word;
        }

        Self {
            sequence,
            payload: Payload(payload),
        }
    }

    /// Encode into the wire layout
    pub fn write_bytes(&self, out: &mut [u8; PACKET_BYTES]) {
        let words = std::iter::once(self.sequence).chain(self.payload.0.iter().copied());
        for (chunk, word) in out.chunks_exact_mut(BYTES_PER_WORD).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
    }

    pub fn to_bytes(&self) -> [u8; PACKET_BYTES] {
        let mut out = [0u8; PACKET_BYTES];
        self.write_bytes(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::REFERENCE_PAYLOAD;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(PAYLOAD_BYTES, 92);
        assert_eq!(PACKET_BYTES, 96);
        assert_eq!(PACKET_BITS, 768);
    }

    #[test]
    fn test_sequence_is_first_word_little_endian() {
        let packet = Packet::new(0x0102_0304, REFERENCE_PAYLOAD);
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[..4], &[0x04, 0x03, 0x02, 0x01]);
        // first payload word 0x55555555
        assert_eq!(&bytes[4..8], &[0x55; 4]);
    }

    #[test]
    fn test_decode_matches_encoded_fields() {
        let mut words = REFERENCE_PAYLOAD.0;
        words[22] = 0x1234_5678;
        let packet = Packet::new(42, Payload(words));

        let decoded = Packet::from_bytes(&packet.to_bytes());
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.payload.0[22], 0x1234_5678);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_mismatched_words() {
        let mut words = REFERENCE_PAYLOAD.0;
        words[3] ^= 1;
        words[19] = 0;
        let payload = Payload(words);

        let diff: Vec<usize> = payload.mismatched_words(&REFERENCE_PAYLOAD).collect();
        assert_eq!(diff, vec![3, 19]);
        assert_eq!(REFERENCE_PAYLOAD.mismatched_words(&REFERENCE_PAYLOAD).count(), 0);
    }
}
