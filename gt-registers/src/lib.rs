//! # GT Register Library
//!
//! This crate describes the register interface of the FPGA compute units used to test
//! high-speed serial transceivers ("GTs"). It contains no I/O: every item is either a
//! constant register map or a pure function that packs, unpacks or decodes 32-bit words.
//!
//! ## Overview
//!
//! Three families of test cores exist, each with its own register map:
//!
//! - **GT_PRBS**: quad-lane PRBS core with simple 64-bit split counters
//! - **GT_LPBK**: quad-lane loopback core with lane configuration and a reset register only
//! - **Multi-GT PRBS**: PRBS core for GTF, GTM and GTYP transceivers with burst-readable
//!   counters, live/falling/rising status triads and a hardware second counter
//!
//! The [`map::RegisterMap`] constants collect the addresses and bit positions for each family.
//!
//! ## Basic Usage
//!
//! ### Packing a lane configuration word
//!
//! ```
//! use gt_registers::lane_config::{LaneConfigLayout, LaneWord};
//!
//! let word = LaneWord {
//!     loopback: 2,
//!     tx_diffctrl: 12,
//!     ..LaneWord::default()
//! };
//! let packed = LaneConfigLayout::MULTI_GT.pack(&word);
//! assert_eq!(packed, (2 << 29) | 12);
//! assert_eq!(LaneConfigLayout::MULTI_GT.unpack(packed), word);
//! ```
//!
//! ### Decoding a status triad
//!
//! ```
//! use gt_registers::map::MULTI_GT;
//!
//! let status = MULTI_GT.status.expect("Multi-GT exposes a status register");
//! let power_good = status.power_good.decode(0b101);
//! assert!(power_good.live);
//! assert!(power_good.rising);
//! assert!(!power_good.falling);
//! ```
//!
//! ### Decoding a burst of RX counters
//!
//! ```
//! use gt_registers::counters::{decode_rx_burst, MULTI_GT_BURST_WORDS};
//!
//! let mut words = [0u32; MULTI_GT_BURST_WORDS];
//! words[0] = 1000;
//! words[12] = 0x8000_0003;
//! let burst = decode_rx_burst(&words).expect("Burst has the expected size");
//! assert_eq!(burst.lanes[0].word_count, 1000);
//! assert!(burst.toggle);
//! assert_eq!(burst.timestamp, 3);
//! ```
//!
//! ## Addressing
//!
//! All addresses are 32-bit word indices inside the address space of one compute unit.
//! Backends multiply by four when accessing byte-addressed memory.

pub mod counters;
pub mod error;
pub mod field;
pub mod lane_config;
pub mod map;

pub use field::{Field, LaneBits, Triad, TriadBits};

/// Maximum number of lanes served by one compute unit.
pub const MAX_LANES: usize = 4;
