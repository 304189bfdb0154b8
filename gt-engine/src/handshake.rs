//! Reset and handshake protocol.
//!
//! A reset moves the protocol through
//!
//! ```text
//! Idle -> ResetIssued -> AwaitingRequestEdge -> AwaitingSettle -> Stable
//!                                                             \-> Failed
//! ```
//!
//! Each check reads the live/falling/rising triads of the status register. Cores that expose
//! per-lane reset status (GTF) get failures attributed to the failing lanes, all other cores
//! report every enabled lane as failed.
//!
//! Checks only report. Whether a failure aborts the test is decided by the caller.
use gt_registers::{
    Triad, TriadBits,
    map::{LaneStatusLayout, ResetStyle, StatusLayout},
};

use crate::{
    RegisterAccess,
    clock::Ticker,
    config::Config,
    device::ComputeUnit,
    error::{Check, EngineError, HandshakeFailure},
    lane::LaneSet,
    reset_lock::ResetDomain,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    ResetIssued,
    AwaitingRequestEdge,
    AwaitingSettle,
    Stable,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Tx,
    Rx,
    Both,
}

impl Side {
    fn includes_tx(self) -> bool {
        matches!(self, Side::Tx | Side::Both)
    }

    fn includes_rx(self) -> bool {
        matches!(self, Side::Rx | Side::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTarget {
    Full,
    Tx,
    Rx,
    TxDatapath,
    RxDatapath,
}

impl ResetTarget {
    pub fn side(self) -> Side {
        match self {
            ResetTarget::Full => Side::Both,
            ResetTarget::Tx | ResetTarget::TxDatapath => Side::Tx,
            ResetTarget::Rx | ResetTarget::RxDatapath => Side::Rx,
        }
    }
}

pub struct Handshake {
    state: HandshakeState,
    watchdog_max: u32,
}

impl Handshake {
    pub fn new(config: &Config) -> Handshake {
        Handshake {
            state: HandshakeState::Idle,
            watchdog_max: config.watchdog_max,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Write the reset bit of `target` while holding the reset lock of the GT.
    ///
    /// The lock is released after one settle tick.
    pub fn issue_reset<R: RegisterAccess>(
        &mut self,
        cu: &ComputeUnit<R>,
        target: ResetTarget,
        domain: &ResetDomain,
        ticker: &Ticker,
    ) -> Result<(), EngineError> {
        let _guard = domain.lock();
        log::debug!("GT {}: issue {:?} reset", cu.gt_index(), target);
        match cu.map().reset_style {
            ResetStyle::WriteZero => cu.write_ctrl(0)?,
            ResetStyle::SetBits => {
                let control = cu.control()?;
                let bit = match target {
                    ResetTarget::Full => Some(control.full_reset),
                    ResetTarget::Tx => control.tx_reset,
                    ResetTarget::Rx => control.rx_reset,
                    ResetTarget::TxDatapath => control.tx_datapath_reset,
                    ResetTarget::RxDatapath => control.rx_datapath_reset,
                };
                cu.set_ctrl_bits(bit.ok_or(EngineError::Unsupported("targeted reset"))?)?;
            }
        }
        self.state = HandshakeState::ResetIssued;
        ticker.wait_ticks(1);
        self.state = HandshakeState::AwaitingRequestEdge;
        Ok(())
    }

    pub fn issue_full_reset<R: RegisterAccess>(
        &mut self,
        cu: &ComputeUnit<R>,
        domain: &ResetDomain,
        ticker: &Ticker,
    ) -> Result<(), EngineError> {
        self.issue_reset(cu, ResetTarget::Full, domain, ticker)
    }

    pub fn check_power_good<R: RegisterAccess>(
        &self,
        cu: &ComputeUnit<R>,
        enabled: LaneSet,
        expect_edges: bool,
    ) -> Result<(), EngineError> {
        let Some(status) = cu.status_layout() else {
            return Ok(());
        };
        let triad = status.power_good.decode(cu.read(status.addr)?);
        let accept = |triad: Triad| triad.live && (expect_edges || !triad.has_edges());
        if accept(triad) {
            log::debug!("GT {}: power good", cu.gt_index());
            return Ok(());
        }

        let mut lanes = LaneSet::EMPTY;
        if let Some(lane_status) = &status.lane_status {
            for lane in enabled.iter() {
                let word = cu.read(lane_status.addrs[usize::from(lane)])?;
                if !accept(lane_status.power_good.decode(word)) {
                    lanes.insert(lane);
                }
            }
        }
        if lanes.is_empty() {
            lanes = enabled;
        }
        log::error!(
            "GT {}: power good check failed ({:?}), lanes {}",
            cu.gt_index(),
            triad,
            lanes
        );
        Err(HandshakeFailure {
            check: Check::PowerGood,
            lanes,
            live_lost: !triad.live,
            attempts: None,
        }
        .into())
    }

    /// Check the PLL lock. Edges are only a failure if `expect_stable` is set.
    pub fn check_pll_lock<R: RegisterAccess>(
        &self,
        cu: &ComputeUnit<R>,
        enabled: LaneSet,
        expect_stable: bool,
    ) -> Result<(), EngineError> {
        let Some(status) = cu.status_layout() else {
            return Ok(());
        };
        let triad = status.pll_lock.decode(cu.read(status.addr)?);
        if !triad.live {
            log::error!("GT {}: PLL not locked", cu.gt_index());
            return Err(HandshakeFailure {
                check: Check::PllLock,
                lanes: enabled,
                live_lost: true,
                attempts: None,
            }
            .into());
        }
        if triad.has_edges() {
            if expect_stable {
                log::error!("GT {}: PLL lock unstable ({:?})", cu.gt_index(), triad);
                return Err(HandshakeFailure {
                    check: Check::PllLock,
                    lanes: enabled,
                    live_lost: false,
                    attempts: None,
                }
                .into());
            }
            log::debug!("GT {}: PLL lock toggled during bring-up", cu.gt_index());
        }
        Ok(())
    }

    /// Look for the falling edge of reset-done that acknowledges a reset request.
    ///
    /// The edge is only logged. Its absence is not a failure.
    pub fn check_reset_request<R: RegisterAccess>(
        &mut self,
        cu: &ComputeUnit<R>,
        side: Side,
    ) -> Result<(), EngineError> {
        if let Some(status) = cu.status_layout() {
            let word = cu.read(status.addr)?;
            for (name, bits, included) in [
                ("TX", status.tx_reset_done, side.includes_tx()),
                ("RX", status.rx_reset_done, side.includes_rx()),
            ] {
                if included && bits.falling.is_some() {
                    if bits.decode(word).falling {
                        log::debug!("GT {}: {} reset request acknowledged", cu.gt_index(), name);
                    } else {
                        log::debug!("GT {}: {} reset request not seen", cu.gt_index(), name);
                    }
                }
            }
        }
        self.state = HandshakeState::AwaitingSettle;
        Ok(())
    }

    /// Poll until reset-done is high on `side`, re-issuing the reset between polls.
    ///
    /// Gives up after `watchdog_max` polls.
    pub fn check_reset_over<R: RegisterAccess>(
        &mut self,
        cu: &ComputeUnit<R>,
        enabled: LaneSet,
        side: Side,
        domain: &ResetDomain,
        ticker: &Ticker,
    ) -> Result<(), EngineError> {
        self.state = HandshakeState::AwaitingSettle;
        let target = match side {
            Side::Both => ResetTarget::Full,
            Side::Tx => ResetTarget::Tx,
            Side::Rx => ResetTarget::Rx,
        };
        let mut failing = enabled;
        for attempt in 1..=self.watchdog_max {
            if ticker.is_aborted() {
                return Err(EngineError::Aborted);
            }
            failing = reset_done_failures(cu, enabled, side, false)?;
            if failing.is_empty() {
                log::debug!("GT {}: reset over after {} attempt(s)", cu.gt_index(), attempt);
                self.state = HandshakeState::Stable;
                return Ok(());
            }
            log::warn!(
                "GT {}: reset not over on lanes {} (attempt {}/{})",
                cu.gt_index(),
                failing,
                attempt,
                self.watchdog_max
            );
            if attempt < self.watchdog_max {
                cu.clear_status()?;
                self.issue_reset(cu, target, domain, ticker)?;
                ticker.wait_ticks(1);
                self.check_reset_request(cu, side)?;
            }
        }
        self.state = HandshakeState::Failed;
        log::error!(
            "GT {}: reset never completed on lanes {} after {} attempts",
            cu.gt_index(),
            failing,
            self.watchdog_max
        );
        Err(HandshakeFailure {
            check: Check::ResetOver,
            lanes: failing,
            live_lost: true,
            attempts: Some(self.watchdog_max),
        }
        .into())
    }

    /// Require reset-done high without any edge since the last clear.
    pub fn check_reset_stable<R: RegisterAccess>(
        &mut self,
        cu: &ComputeUnit<R>,
        enabled: LaneSet,
        side: Side,
    ) -> Result<(), EngineError> {
        let failing = reset_done_failures(cu, enabled, side, true)?;
        if failing.is_empty() {
            return Ok(());
        }
        self.state = HandshakeState::Failed;
        log::error!(
            "GT {}: {:?} reset not stable on lanes {}",
            cu.gt_index(),
            side,
            failing
        );
        Err(HandshakeFailure {
            check: Check::ResetStable,
            lanes: failing,
            live_lost: false,
            attempts: None,
        }
        .into())
    }
}

fn triad_ok(triad: Triad, strict: bool) -> bool {
    triad.live && !(strict && triad.has_edges())
}

fn side_bits(status: &StatusLayout, side: Side) -> impl Iterator<Item = TriadBits> {
    let tx = side.includes_tx().then_some(status.tx_reset_done);
    let rx = side.includes_rx().then_some(status.rx_reset_done);
    tx.into_iter().chain(rx)
}

fn lane_side_bits(lane_status: &LaneStatusLayout, side: Side) -> impl Iterator<Item = TriadBits> {
    let tx = side
        .includes_tx()
        .then_some(lane_status.tx_done)
        .into_iter()
        .flatten();
    let rx = side
        .includes_rx()
        .then_some(lane_status.rx_done)
        .into_iter()
        .flatten();
    tx.chain(rx)
}

/// Lanes whose reset-done condition does not hold. Edges count as failure if `strict`.
fn reset_done_failures<R: RegisterAccess>(
    cu: &ComputeUnit<R>,
    enabled: LaneSet,
    side: Side,
    strict: bool,
) -> Result<LaneSet, EngineError> {
    let Some(status) = cu.status_layout() else {
        return Ok(LaneSet::EMPTY);
    };
    let word = cu.read(status.addr)?;
    let aggregate_ok = side_bits(status, side).all(|bits| triad_ok(bits.decode(word), strict));

    let mut failing = LaneSet::EMPTY;
    if let Some(lane_status) = &status.lane_status {
        for lane in enabled.iter() {
            let word = cu.read(lane_status.addrs[usize::from(lane)])?;
            if !lane_side_bits(lane_status, side).all(|bits| triad_ok(bits.decode(word), strict)) {
                failing.insert(lane);
            }
        }
    }
    if !aggregate_ok && failing.is_empty() {
        failing = enabled;
    }
    Ok(failing)
}
