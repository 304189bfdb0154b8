//! Register-level model of the test cores.
//!
//! The model keeps just enough state to answer the engine's reads plausibly:
//!
//! - control writes: persistent enables, self-clearing strobes, error injection pulses
//! - status signals with sticky edge detectors that a clear resets
//! - resets that pull reset-done low for [`RESET_TIME`]
//! - counters that grow with the virtual clock while TX and RX are enabled
use std::{
    io,
    sync::{
        Arc, Mutex, MutexGuard, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use gt_engine::{RegisterAccess, clock::Clock, kind::TransceiverKind};
use gt_registers::{
    MAX_LANES, Triad,
    counters::{
        HW_TICK_INDEX, MULTI_GT_BURST_WORDS, MULTI_GT_TX_WORDS, RxBurst, RxLaneCounters,
        encode_hw_tick, encode_rx_burst, encode_tx_block,
    },
    map::{CounterLayout, RegisterMap, ResetStyle, StatusLayout},
};

use crate::clock::VirtualClock;

/// Time reset-done stays low after a reset request.
pub const RESET_TIME: Duration = Duration::from_millis(500);

/// Real time a reset request stays in flight on a [`ResetTracker`].
const RESET_WINDOW: Duration = Duration::from_millis(2);

/// Reset requests in flight on cores that share one physical reset domain.
///
/// A request enters on the reset write and leaves during the next sleep of the core's clock,
/// which is the settle tick the engine waits while holding its reset lock.
#[derive(Debug, Default)]
pub struct ResetTracker {
    in_flight: AtomicUsize,
    requests: AtomicUsize,
    overlaps: AtomicUsize,
}

impl ResetTracker {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Requests that started while another one was still in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        thread::sleep(RESET_WINDOW);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Traffic of one lane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaneBehaviour {
    pub words_per_second: u64,
    pub errors_per_second: u64,
    pub rx_seed_zero: bool,
    pub tx_seed_zero: bool,
}

impl LaneBehaviour {
    /// A lane running exactly at the nominal rate of `kind` without errors.
    pub fn nominal(kind: TransceiverKind) -> LaneBehaviour {
        let profile = kind.rate_profile();
        LaneBehaviour {
            words_per_second: (profile.nominal_rate_gbps * 1e9 / f64::from(profile.unit_bits))
                .round() as u64,
            errors_per_second: 0,
            rx_seed_zero: false,
            tx_seed_zero: false,
        }
    }
}

fn set_live(triad: &mut Triad, live: bool) {
    if triad.live && !live {
        triad.falling = true;
    }
    if !triad.live && live {
        triad.rising = true;
    }
    triad.live = live;
}

fn high() -> Triad {
    Triad {
        live: true,
        ..Triad::default()
    }
}

struct State {
    ctrl: u32,
    lane_config: [u32; MAX_LANES],
    lanes: [LaneBehaviour; MAX_LANES],
    lane_power_good: [Triad; MAX_LANES],
    power_good: Triad,
    pll_lock: Triad,
    tx_done: Triad,
    rx_done: Triad,
    /// Reset-done sides held low and the time they come back.
    pending_reset: Option<(Duration, bool, bool)>,
    reset_stuck: bool,
    resets: u32,
    writes: u32,
    cleared_at: Duration,
    /// Injected errors since the last clear.
    injected: [u64; MAX_LANES],
    /// Injected errors not yet reported by an RX burst.
    unreported: [u64; MAX_LANES],
}

impl State {
    fn new(kind: TransceiverKind) -> State {
        State {
            ctrl: 0,
            lane_config: [0; MAX_LANES],
            lanes: [LaneBehaviour::nominal(kind); MAX_LANES],
            lane_power_good: [high(); MAX_LANES],
            power_good: high(),
            pll_lock: high(),
            tx_done: high(),
            rx_done: high(),
            pending_reset: None,
            reset_stuck: false,
            resets: 0,
            writes: 0,
            cleared_at: Duration::ZERO,
            injected: [0; MAX_LANES],
            unreported: [0; MAX_LANES],
        }
    }

    fn settle(&mut self, now: Duration) {
        if let Some((until, tx, rx)) = self.pending_reset
            && now >= until
            && !self.reset_stuck
        {
            if tx {
                set_live(&mut self.tx_done, true);
            }
            if rx {
                set_live(&mut self.rx_done, true);
            }
            self.pending_reset = None;
        }
    }

    fn start_reset(&mut self, now: Duration, tx: bool, rx: bool) {
        log::debug!("simulated reset at {:?} (TX {}, RX {})", now, tx, rx);
        self.resets += 1;
        if tx {
            set_live(&mut self.tx_done, false);
        }
        if rx {
            set_live(&mut self.rx_done, false);
        }
        let (tx, rx) = match self.pending_reset {
            Some((_, pending_tx, pending_rx)) => (tx || pending_tx, rx || pending_rx),
            None => (tx, rx),
        };
        self.pending_reset = Some((now + RESET_TIME, tx, rx));
    }

    fn clear(&mut self, now: Duration) {
        for triad in [
            &mut self.power_good,
            &mut self.pll_lock,
            &mut self.tx_done,
            &mut self.rx_done,
        ]
        .into_iter()
        .chain(self.lane_power_good.iter_mut())
        {
            triad.falling = false;
            triad.rising = false;
        }
        self.cleared_at = now;
        self.injected = [0; MAX_LANES];
        self.unreported = [0; MAX_LANES];
    }

    fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.cleared_at)
    }
}

/// A compute unit without hardware.
pub struct SimulatedCore {
    kind: TransceiverKind,
    map: &'static RegisterMap,
    clock: Arc<VirtualClock>,
    state: Mutex<State>,
    reset_tracker: OnceLock<Arc<ResetTracker>>,
}

impl SimulatedCore {
    pub fn new(kind: TransceiverKind, clock: Arc<VirtualClock>) -> SimulatedCore {
        SimulatedCore {
            kind,
            map: kind.register_map(),
            clock,
            state: Mutex::new(State::new(kind)),
            reset_tracker: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> TransceiverKind {
        self.kind
    }

    fn state(&self) -> MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.settle(self.clock.now());
        state
    }

    /// Last value written to the configuration register of `lane`.
    pub fn lane_config(&self, lane: u8) -> u32 {
        self.state().lane_config[usize::from(lane)]
    }

    /// Persistent control bits.
    pub fn ctrl(&self) -> u32 {
        self.state().ctrl
    }

    /// Number of reset requests seen so far.
    pub fn resets(&self) -> u32 {
        self.state().resets
    }

    /// Number of register writes seen so far.
    pub fn writes(&self) -> u32 {
        self.state().writes
    }

    pub fn set_lane(&self, lane: u8, behaviour: LaneBehaviour) {
        self.state().lanes[usize::from(lane)] = behaviour;
    }

    pub fn lane(&self, lane: u8) -> LaneBehaviour {
        self.state().lanes[usize::from(lane)]
    }

    pub fn set_pll_lock(&self, locked: bool) {
        set_live(&mut self.state().pll_lock, locked);
    }

    /// Change the power good of one lane. The aggregate signal is the AND of all lanes.
    pub fn set_lane_power_good(&self, lane: u8, good: bool) {
        let mut state = self.state();
        set_live(&mut state.lane_power_good[usize::from(lane)], good);
        let all_good = state.lane_power_good.iter().all(|triad| triad.live);
        set_live(&mut state.power_good, all_good);
    }

    /// Report reset requests to `tracker`. Only the first tracker set is used.
    pub fn track_resets(&self, tracker: Arc<ResetTracker>) {
        let _ = self.reset_tracker.set(tracker);
    }

    /// Keep reset-done low after the next reset.
    pub fn set_reset_stuck(&self, stuck: bool) {
        self.state().reset_stuck = stuck;
    }

    /// Let TX reset-done drop and recover between two status reads.
    pub fn glitch_tx_reset_done(&self) {
        let mut state = self.state();
        state.tx_done.falling = true;
        state.tx_done.rising = true;
    }

    fn control_write(&self, state: &mut State, value: u32, now: Duration) {
        let Some(control) = &self.map.control else {
            return;
        };
        if value & control.full_reset != 0 {
            state.start_reset(now, true, true);
        }
        let strobe = |bit: Option<u32>| bit.is_some_and(|bit| value & bit != 0);
        let tx = strobe(control.tx_reset) || strobe(control.tx_datapath_reset);
        let rx = strobe(control.rx_reset) || strobe(control.rx_datapath_reset);
        if tx || rx {
            state.start_reset(now, tx, rx);
        }
        if value & control.clear_status != 0 {
            state.clear(now);
        }
        for lane in 0..MAX_LANES as u8 {
            let inject = control.error_inject;
            if inject.is_set(value, lane) && !inject.is_set(state.ctrl, lane) {
                state.injected[usize::from(lane)] += 1;
                state.unreported[usize::from(lane)] += 1;
            }
        }
        let persistent = control.tx_enable
            | control.rx_enable
            | control.disable_ref_prbs
            | control.error_inject.mask();
        state.ctrl = value & persistent;
    }

    fn tx_on(&self, state: &State) -> bool {
        self.map
            .control
            .is_some_and(|control| state.ctrl & control.tx_enable != 0)
    }

    fn rx_on(&self, state: &State) -> bool {
        self.tx_on(state)
            && self
                .map
                .control
                .is_some_and(|control| state.ctrl & control.rx_enable != 0)
    }

    /// Errors counted by the split counters since the last clear.
    fn split_errors(&self, state: &State, lane: usize, now: Duration) -> u64 {
        if !self.rx_on(state) {
            return 0;
        }
        let seconds = state.elapsed(now).as_secs_f64();
        (state.lanes[lane].errors_per_second as f64 * seconds) as u64 + state.injected[lane]
    }

    fn status_word(&self, layout: &StatusLayout, state: &State, now: Duration) -> u32 {
        let mut word = layout.power_good.encode(state.power_good)
            | layout.pll_lock.encode(state.pll_lock)
            | layout.tx_reset_done.encode(state.tx_done)
            | layout.rx_reset_done.encode(state.rx_done);
        for lane in 0..MAX_LANES as u8 {
            let index = usize::from(lane);
            let behaviour = state.lanes[index];
            let errors = match self.map.counters {
                CounterLayout::Split { .. } => self.split_errors(state, index, now) > 0,
                _ => {
                    self.rx_on(state)
                        && (behaviour.errors_per_second > 0 || state.injected[index] > 0)
                }
            };
            if errors {
                word |= layout.rx_prbs_error.bit(lane);
            }
            if behaviour.rx_seed_zero {
                word |= layout.rx_seed_zero.bit(lane);
            }
            if behaviour.tx_seed_zero {
                word |= layout.tx_seed_zero.bit(lane);
            }
        }
        word
    }

    fn hw_tick(&self, state: &State, now: Duration) -> u32 {
        let seconds = state.elapsed(now).as_secs() as u32;
        encode_hw_tick(seconds % 2 == 1, seconds)
    }

    fn rx_burst(&self, state: &State, now: Duration) -> [u32; MULTI_GT_BURST_WORDS] {
        let mut burst = RxBurst::default();
        if self.rx_on(state) {
            for (index, counters) in burst.lanes.iter_mut().enumerate() {
                *counters = RxLaneCounters {
                    word_count: state.lanes[index].words_per_second,
                    error_count: state.lanes[index].errors_per_second + state.unreported[index],
                };
            }
        }
        let seconds = state.elapsed(now).as_secs() as u32;
        burst.toggle = seconds % 2 == 1;
        burst.timestamp = seconds;
        encode_rx_burst(&burst)
    }

    fn tx_block(&self, state: &State, now: Duration) -> [u32; MULTI_GT_TX_WORDS] {
        let mut words = [0; MAX_LANES];
        if self.tx_on(state) {
            let seconds = state.elapsed(now).as_secs().saturating_sub(1);
            for (count, lane) in words.iter_mut().zip(&state.lanes) {
                *count = lane.words_per_second * seconds;
            }
        }
        encode_tx_block(&words)
    }

    fn read_word(&self, state: &State, addr: u16, now: Duration) -> u32 {
        let map = self.map;
        let mut value = 0;
        if addr == map.ctrl {
            value |= state.ctrl;
        }
        if let Some(status) = &map.status {
            if addr == status.addr {
                value |= self.status_word(status, state, now);
            }
            if let Some(lane_status) = &status.lane_status
                && let Some(lane) = lane_status.addrs.iter().position(|a| *a == addr)
            {
                value |= lane_status.power_good.encode(state.lane_power_good[lane]);
                // only the wizard signals carry the aggregate edges
                for (signals, done) in [
                    (lane_status.tx_done, state.tx_done),
                    (lane_status.rx_done, state.rx_done),
                ] {
                    value |= signals[0].encode(done);
                    for bits in &signals[1..] {
                        value |= bits.encode(Triad {
                            live: done.live,
                            ..Triad::default()
                        });
                    }
                }
            }
        }
        if let Some(lane) = map.lane_config.iter().position(|a| *a == addr) {
            value |= state.lane_config[lane];
        }

        match map.counters {
            CounterLayout::None => {}
            CounterLayout::Split { tx_base, rx_base } => {
                let seconds = state.elapsed(now).as_secs_f64();
                let words = |lane: usize, on: bool| {
                    if on {
                        (state.lanes[lane].words_per_second as f64 * seconds) as u64
                    } else {
                        0
                    }
                };
                let half = |value: u64, msb: bool| {
                    if msb { (value >> 32) as u32 } else { value as u32 }
                };
                if (tx_base..tx_base + 2 * MAX_LANES as u16).contains(&addr) {
                    let offset = usize::from(addr - tx_base);
                    value |= half(words(offset / 2, self.tx_on(state)), offset % 2 == 1);
                }
                if (rx_base..rx_base + 4 * MAX_LANES as u16).contains(&addr) {
                    let offset = usize::from(addr - rx_base);
                    let lane = offset / 4;
                    let count = if offset % 4 < 2 {
                        words(lane, self.rx_on(state))
                    } else {
                        self.split_errors(state, lane, now)
                    };
                    value |= half(count, offset % 2 == 1);
                }
            }
            CounterLayout::Burst {
                tx_base,
                stopwatch,
                rx_base,
            } => {
                if addr == stopwatch {
                    value |= state.elapsed(now).as_secs() as u32;
                }
                if (tx_base..tx_base + MULTI_GT_TX_WORDS as u16).contains(&addr) {
                    value |= self.tx_block(state, now)[usize::from(addr - tx_base)];
                }
                if addr == rx_base + HW_TICK_INDEX as u16 {
                    value |= self.hw_tick(state, now);
                } else if (rx_base..rx_base + MULTI_GT_BURST_WORDS as u16).contains(&addr) {
                    value |= self.rx_burst(state, now)[usize::from(addr - rx_base)];
                }
            }
        }
        value
    }
}

impl RegisterAccess for SimulatedCore {
    fn read(&self, addr: u16) -> io::Result<u32> {
        let now = self.clock.now();
        let state = self.state();
        Ok(self.read_word(&state, addr, now))
    }

    fn write(&self, addr: u16, value: u32) -> io::Result<()> {
        let now = self.clock.now();
        let mut state = self.state();
        state.writes += 1;
        let resets = state.resets;
        if addr == self.map.ctrl {
            match self.map.reset_style {
                ResetStyle::WriteZero if value == 0 => state.start_reset(now, true, true),
                ResetStyle::WriteZero => {}
                ResetStyle::SetBits => self.control_write(&mut state, value, now),
            }
        } else if let Some(lane) = self.map.lane_config.iter().position(|a| *a == addr) {
            state.lane_config[lane] = value;
        }
        let reset = state.resets > resets;
        drop(state);
        if reset && let Some(tracker) = self.reset_tracker.get() {
            tracker.enter();
            let tracker = tracker.clone();
            self.clock.schedule(now, move || tracker.leave());
        }
        Ok(())
    }

    fn read_burst(&self, addr: u16, buf: &mut [u32]) -> io::Result<()> {
        let now = self.clock.now();
        let mut state = self.state();
        if let CounterLayout::Burst { rx_base, .. } = self.map.counters
            && addr == rx_base
            && buf.len() == MULTI_GT_BURST_WORDS
        {
            buf.copy_from_slice(&self.rx_burst(&state, now));
            // a burst read reports injected errors once, single reads leave them pending
            if self.rx_on(&state) {
                state.unreported = [0; MAX_LANES];
            }
            return Ok(());
        }
        for (offset, word) in buf.iter_mut().enumerate() {
            *word = self.read_word(&state, addr + offset as u16, now);
        }
        Ok(())
    }
}
