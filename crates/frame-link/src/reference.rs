//! Reference payload, the correctness oracle
//!
//! Mirrors the `test_payload` constant in the FPGA design: twenty easy to
//! eyeball words, every remaining word filled with `PAD_WORD`.

use crate::packet::{Payload, WORDS_PER_PAYLOAD};

/// Filler the FPGA puts in every trailing payload word
pub const PAD_WORD: u32 = 0xDEAD_BEEF;

const PATTERN: [u32; 20] = [
    0x5555_5555,
    0xAAAA_AAAA,
    0xFFFF_FFFF,
    0x0000_0000,
    0x0000_0001,
    0x0000_0000,
    0xFFFF_FFFF,
    0xFFFF_FFFE,
    0xFFFF_FFFF,
    0xABCD_EF00,
    0x9876_5432,
    0x2468_2468,
    0xFFFF_FFFF,
    0x0000_0000,
    0x0000_0001,
    0x0000_0000,
    0xFFFF_FFFF,
    0xFFFF_FFFE,
    0xFFFF_FFFF,
    0x1234_ABCD,
];

const _: () = assert!(PATTERN.len() <= WORDS_PER_PAYLOAD);

const fn build_reference() -> Payload {
    let mut words = [PAD_WORD; WORDS_PER_PAYLOAD];
    let mut i = 0;
    while i < PATTERN.len() {
        words[i] = PATTERN[i];
        i += 1;
    }
    Payload::new(words)
}

/// Payload every correctly received packet must carry
pub const REFERENCE_PAYLOAD: Payload = build_reference();
