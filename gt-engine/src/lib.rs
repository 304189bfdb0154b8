//! # GT Test Engine
//!
//! This crate drives and verifies high-speed serial transceiver ("GT") lanes of an FPGA
//! through the registers of a PRBS test compute unit.
//!
//! ## Overview
//!
//! One engine instance tests one GT (one compute unit, up to four lanes). It
//!
//! 1. resolves the per-lane electrical configuration from defaults and overrides
//!    ([`resolver`])
//! 2. compiles the user's test sequence into typed steps ([`sequence`])
//! 3. drives the reset/handshake protocol against the status registers ([`handshake`])
//! 4. measures PRBS link health: word and error counts, bit error rate and line rate
//!    ([`monitor`])
//! 5. runs the steps and aggregates per-lane results into a matrix ([`controller`])
//!
//! ## Architecture
//!
//! - **[`RegisterAccess`] Trait**: Defines how the engine reaches the hardware. Backends
//!   (UIO, PCIe BAR, simulators) implement it.
//! - **[`clock::Clock`] Trait**: Every wait goes through a clock so tests can run on
//!   virtual time.
//! - **[`testcase::TestCase`] Trait**: The four-phase lifecycle
//!   (`pre_setup`, `run`, `post_teardown`, `abort`) with one implementation per core family.
//!
//! ## Basic Usage
//!
//! ### Implementing a Backend
//!
//! ```ignore
//! use gt_engine::RegisterAccess;
//! use std::io;
//!
//! struct MyBackend {
//!     // device-specific fields
//! }
//!
//! impl RegisterAccess for MyBackend {
//!     fn read(&self, addr: u16) -> io::Result<u32> {
//!         // read the 32-bit register at word index `addr`
//!         Ok(0)
//!     }
//!
//!     fn write(&self, addr: u16, value: u32) -> io::Result<()> {
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ### Running a Test
//!
//! ```ignore
//! use gt_engine::testcase::{Environment, TestParameters, execute, new_test_case};
//! use gt_engine::kind::TransceiverKind;
//!
//! let params = TestParameters::new(0).with_sequence(default_sequence(TransceiverKind::Gtf));
//! let mut test = new_test_case(TransceiverKind::Gtf, backend, params, Environment::default(), sink);
//! let result = execute(test.as_mut());
//! ```
//!
//! ## Error Handling
//!
//! Invalid configuration and sequences are rejected in `pre_setup` before any hardware access.
//! Handshake failures while bringing the link up abort the whole test. Signal failures
//! during measurement are attributed to the failing lane and step only.
//!
//! ## Configuration
//!
//! Timing and retry behaviour can be customized via [`config::Config`]:
//!
//! - **tick**: length of one wait tick (default: 1 second)
//! - **fast_tick**: polling interval of the hardware second toggle (default: 333 ms)
//! - **watchdog_max**: reset-over polls before giving up (default: 5)
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Enable logging to see:
//! - Steps as they start and complete
//! - Register writes and handshake progress
//! - Per-lane measurement results and failures
//!
//! ## Thread Model
//!
//! Engines are synchronous. Run one engine per GT on its own thread. Engines
//! that share a physical reset domain serialize their resets through [`reset_lock::ResetLocks`].
use std::{io, sync::Arc};

pub mod clock;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod handshake;
pub mod kind;
pub mod lane;
pub mod monitor;
pub mod report;
pub mod reset_lock;
pub mod resolver;
pub mod sequence;
pub mod testcase;

/// Trait that register backends must implement.
///
/// Addresses are 32-bit word indices inside the address space of one compute unit.
/// Implementations are responsible for translating them to the actual bus access.
pub trait RegisterAccess {
    /// Read the register at `addr`.
    fn read(&self, addr: u16) -> io::Result<u32>;

    /// Write `value` to the register at `addr`.
    fn write(&self, addr: u16, value: u32) -> io::Result<()>;

    /// Read consecutive registers starting at `addr` into `buf`.
    ///
    /// Backends that support burst transfers should override this so the block is read
    /// in one transaction.
    fn read_burst(&self, addr: u16, buf: &mut [u32]) -> io::Result<()> {
        for (offset, word) in buf.iter_mut().enumerate() {
            *word = self.read(addr.wrapping_add(offset as u16))?;
        }
        Ok(())
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for &T {
    fn read(&self, addr: u16) -> io::Result<u32> {
        (**self).read(addr)
    }

    fn write(&self, addr: u16, value: u32) -> io::Result<()> {
        (**self).write(addr, value)
    }

    fn read_burst(&self, addr: u16, buf: &mut [u32]) -> io::Result<()> {
        (**self).read_burst(addr, buf)
    }
}

impl<T: RegisterAccess + ?Sized> RegisterAccess for Arc<T> {
    fn read(&self, addr: u16) -> io::Result<u32> {
        (**self).read(addr)
    }

    fn write(&self, addr: u16, value: u32) -> io::Result<()> {
        (**self).write(addr, value)
    }

    fn read_burst(&self, addr: u16, buf: &mut [u32]) -> io::Result<()> {
        (**self).read_burst(addr, buf)
    }
}
