//! Counter decoding.
//!
//! Multi-GT cores pack 48-bit word and error counters for two lanes into three registers:
//!
//! ```text
//! r[j]     = word_count[31:0]
//! r[j + 1] = error_count[15:0] << 16 | word_count[47:32]
//! r[j + 2] = error_count[47:16]
//! ```
//!
//! The RX block repeats this layout for each lane (`j = 3 * lane`) and ends with the hardware
//! second counter. The TX block packs two word counters into each group of three registers.
use crate::{MAX_LANES, error::DecodeError, field::Field};

/// Number of words fetched by one RX burst read.
pub const MULTI_GT_BURST_WORDS: usize = 16;
/// Words of the RX burst that carry data.
pub const MULTI_GT_BURST_USED: usize = 13;
/// Number of registers in the TX counter block, excluding the stopwatch.
pub const MULTI_GT_TX_WORDS: usize = 6;

/// Offset of the hardware second word inside the RX block.
pub const HW_TICK_INDEX: usize = 12;
const HW_TOGGLE: Field = Field::bit(31);
const HW_TIMESTAMP: Field = Field::new(0, 31);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxLaneCounters {
    pub word_count: u64,
    pub error_count: u64,
}

/// Decoded RX burst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RxBurst {
    pub lanes: [RxLaneCounters; MAX_LANES],
    /// Flips once per hardware second.
    pub toggle: bool,
    /// Hardware seconds since the last clear.
    pub timestamp: u32,
}

/// Decoded TX counter block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxBlock {
    pub word_counts: [u64; MAX_LANES],
    /// Hardware seconds since the last clear.
    pub stopwatch: u32,
}

/// Split the hardware second word into its toggle bit and timestamp.
pub fn decode_hw_tick(word: u32) -> (bool, u32) {
    (HW_TOGGLE.extract(word) != 0, HW_TIMESTAMP.extract(word))
}

pub fn encode_hw_tick(toggle: bool, timestamp: u32) -> u32 {
    HW_TOGGLE.insert(HW_TIMESTAMP.insert(0, timestamp), toggle.into())
}

/// Assemble a 64-bit counter from its split registers.
pub fn join_split(lsb: u32, msb: u32) -> u64 {
    (u64::from(msb) << 32) | u64::from(lsb)
}

fn decode_pair(r: &[u32]) -> (u64, u64) {
    let low = (u64::from(r[1] & 0xFFFF) << 32) | u64::from(r[0]);
    let high = (u64::from(r[2]) << 16) | u64::from(r[1] >> 16);
    (low, high)
}

fn encode_pair(low: u64, high: u64) -> [u32; 3] {
    [
        low as u32,
        ((low >> 32) as u32 & 0xFFFF) | ((high as u32 & 0xFFFF) << 16),
        (high >> 16) as u32,
    ]
}

pub fn decode_rx_burst(words: &[u32]) -> Result<RxBurst, DecodeError> {
    if words.len() < MULTI_GT_BURST_USED {
        return Err(DecodeError::TooFewWords {
            expected: MULTI_GT_BURST_USED,
            got: words.len(),
        });
    }
    let mut burst = RxBurst::default();
    for (lane, counters) in burst.lanes.iter_mut().enumerate() {
        let (word_count, error_count) = decode_pair(&words[3 * lane..3 * lane + 3]);
        *counters = RxLaneCounters {
            word_count,
            error_count,
        };
    }
    (burst.toggle, burst.timestamp) = decode_hw_tick(words[HW_TICK_INDEX]);
    Ok(burst)
}

/// Inverse of [`decode_rx_burst`]. Counters wider than 48 bits are truncated.
pub fn encode_rx_burst(burst: &RxBurst) -> [u32; MULTI_GT_BURST_WORDS] {
    let mut words = [0; MULTI_GT_BURST_WORDS];
    for (lane, counters) in burst.lanes.iter().enumerate() {
        words[3 * lane..3 * lane + 3]
            .copy_from_slice(&encode_pair(counters.word_count, counters.error_count));
    }
    words[HW_TICK_INDEX] = encode_hw_tick(burst.toggle, burst.timestamp);
    words
}

pub fn decode_tx_block(words: &[u32], stopwatch: u32) -> Result<TxBlock, DecodeError> {
    if words.len() < MULTI_GT_TX_WORDS {
        return Err(DecodeError::TooFewWords {
            expected: MULTI_GT_TX_WORDS,
            got: words.len(),
        });
    }
    let mut block = TxBlock {
        stopwatch,
        ..TxBlock::default()
    };
    for pair in 0..MAX_LANES / 2 {
        let (even, odd) = decode_pair(&words[3 * pair..3 * pair + 3]);
        block.word_counts[2 * pair] = even;
        block.word_counts[2 * pair + 1] = odd;
    }
    Ok(block)
}

/// Inverse of [`decode_tx_block`], without the stopwatch.
pub fn encode_tx_block(word_counts: &[u64; MAX_LANES]) -> [u32; MULTI_GT_TX_WORDS] {
    let mut words = [0; MULTI_GT_TX_WORDS];
    for pair in 0..MAX_LANES / 2 {
        words[3 * pair..3 * pair + 3]
            .copy_from_slice(&encode_pair(word_counts[2 * pair], word_counts[2 * pair + 1]));
    }
    words
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rx_burst_word_ordering() {
        let mut words = [0u32; MULTI_GT_BURST_WORDS];
        // lane 1: word count 0x1234_0000_0005, error count 0xABCD_EF01_2345
        words[3] = 0x0000_0005;
        words[4] = 0x2345_1234;
        words[5] = 0xABCD_EF01;
        words[12] = 0x0000_0007;
        let burst = decode_rx_burst(&words).unwrap();
        assert_eq!(burst.lanes[1].word_count, 0x1234_0000_0005);
        assert_eq!(burst.lanes[1].error_count, 0xABCD_EF01_2345);
        assert_eq!(burst.lanes[0], RxLaneCounters::default());
        assert!(!burst.toggle);
        assert_eq!(burst.timestamp, 7);
        assert_eq!(encode_rx_burst(&burst), words);
    }

    #[test]
    fn rx_burst_too_short() {
        let words = [0u32; 12];
        assert!(matches!(
            decode_rx_burst(&words),
            Err(DecodeError::TooFewWords {
                expected: 13,
                got: 12
            })
        ));
    }

    #[test]
    fn tx_block_interleaves_lane_pairs() {
        let counts = [0xFFFF_FFFF_FFFF, 1, 0x1_0000_0000, 0x8000_0000_0000];
        let words = encode_tx_block(&counts);
        let block = decode_tx_block(&words, 11).unwrap();
        assert_eq!(block.word_counts, counts);
        assert_eq!(block.stopwatch, 11);
    }

    #[test]
    fn hw_tick_toggle_is_the_top_bit() {
        assert_eq!(decode_hw_tick(0x8000_0003), (true, 3));
        assert_eq!(encode_hw_tick(false, 0x7FFF_FFFF), 0x7FFF_FFFF);
    }

    #[test]
    fn split_counter() {
        assert_eq!(join_split(0xDEAD_BEEF, 0x1), 0x1_DEAD_BEEF);
    }
}
