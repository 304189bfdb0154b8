//! Register maps of the supported test cores.
use crate::{
    field::{LaneBits, TriadBits},
    lane_config::LaneConfigLayout,
};

/// How the core's reset is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStyle {
    /// Read-modify-write the reset bit into the control register.
    SetBits,
    /// Write zero to the reset register.
    WriteZero,
}

/// Bits of the control register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBits {
    pub full_reset: u32,
    pub tx_reset: Option<u32>,
    pub rx_reset: Option<u32>,
    pub tx_datapath_reset: Option<u32>,
    pub rx_datapath_reset: Option<u32>,
    pub tx_enable: u32,
    pub rx_enable: u32,
    pub clear_status: u32,
    pub latch: Option<u32>,
    pub error_inject: LaneBits,
    pub disable_ref_prbs: u32,
}

/// Per-lane reset status registers. Only GTF cores expose them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneStatusLayout {
    pub addrs: [u16; 4],
    pub power_good: TriadBits,
    /// Wizard TX done, channel TX reset, channel TX sync, TX buffer bypass.
    pub tx_done: [TriadBits; 4],
    /// Wizard RX done, channel RX reset, channel RX sync, RX buffer bypass.
    pub rx_done: [TriadBits; 4],
}

/// Location of the aggregate status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLayout {
    pub addr: u16,
    pub power_good: TriadBits,
    pub pll_lock: TriadBits,
    pub tx_reset_done: TriadBits,
    pub rx_reset_done: TriadBits,
    pub rx_prbs_error: LaneBits,
    pub rx_seed_zero: LaneBits,
    pub tx_seed_zero: LaneBits,
    pub lane_status: Option<LaneStatusLayout>,
}

/// Word and error counter interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterLayout {
    None,
    /// 64-bit counters split into LSB/MSB registers.
    ///
    /// TX: `tx_base + 2 * lane` holds the word count LSB, followed by the MSB.
    /// RX: `rx_base + 4 * lane` holds word count LSB/MSB followed by error count LSB/MSB.
    Split { tx_base: u16, rx_base: u16 },
    /// Counters packed into 48-bit fields, read as one block.
    ///
    /// See [`crate::counters`] for the word ordering.
    Burst {
        tx_base: u16,
        stopwatch: u16,
        rx_base: u16,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub ctrl: u16,
    pub lane_config: [u16; 4],
    pub lane_layout: LaneConfigLayout,
    pub reset_style: ResetStyle,
    pub control: Option<ControlBits>,
    pub status: Option<StatusLayout>,
    pub counters: CounterLayout,
}

pub const GT_PRBS: RegisterMap = RegisterMap {
    ctrl: 0x20,
    lane_config: [0x21, 0x22, 0x23, 0x24],
    lane_layout: LaneConfigLayout::GT_PRBS,
    reset_style: ResetStyle::SetBits,
    control: Some(ControlBits {
        full_reset: 1 << 0,
        tx_reset: None,
        rx_reset: None,
        tx_datapath_reset: None,
        rx_datapath_reset: None,
        tx_enable: 1 << 4,
        rx_enable: 1 << 5,
        // rx prbs error, rx seed zero, tx seed zero
        clear_status: (1 << 8) | (1 << 9) | (1 << 10),
        latch: None,
        error_inject: LaneBits::new(24),
        disable_ref_prbs: 1 << 28,
    }),
    // Status shares the control register and has no edge detectors.
    status: Some(StatusLayout {
        addr: 0x20,
        power_good: TriadBits::live_only(1),
        pll_lock: TriadBits::live_only(6),
        tx_reset_done: TriadBits::live_only(2),
        rx_reset_done: TriadBits::live_only(3),
        rx_prbs_error: LaneBits::new(12),
        rx_seed_zero: LaneBits::new(16),
        tx_seed_zero: LaneBits::new(20),
        lane_status: None,
    }),
    counters: CounterLayout::Split {
        tx_base: 0x28,
        rx_base: 0x30,
    },
};

pub const GT_LPBK: RegisterMap = RegisterMap {
    ctrl: 0x20,
    lane_config: [0x21, 0x22, 0x23, 0x24],
    lane_layout: LaneConfigLayout::GT_LPBK,
    reset_style: ResetStyle::WriteZero,
    control: None,
    status: None,
    counters: CounterLayout::None,
};

const MULTI_GT_CONTROL: ControlBits = ControlBits {
    full_reset: 1 << 0,
    tx_reset: Some(1 << 2),
    rx_reset: Some(1 << 3),
    tx_datapath_reset: Some(1 << 6),
    rx_datapath_reset: Some(1 << 7),
    tx_enable: 1 << 4,
    rx_enable: 1 << 5,
    clear_status: 1 << 8,
    latch: Some(1 << 9),
    error_inject: LaneBits::new(24),
    disable_ref_prbs: 1 << 28,
};

const MULTI_GT_STATUS: StatusLayout = StatusLayout {
    addr: 0x5D,
    power_good: TriadBits::triad(0),
    pll_lock: TriadBits::triad(4),
    tx_reset_done: TriadBits::triad(8),
    rx_reset_done: TriadBits::triad(12),
    rx_prbs_error: LaneBits::new(20),
    rx_seed_zero: LaneBits::new(24),
    tx_seed_zero: LaneBits::new(28),
    lane_status: None,
};

const MULTI_GT_COUNTERS: CounterLayout = CounterLayout::Burst {
    tx_base: 0x48,
    stopwatch: 0x4E,
    rx_base: 0x50,
};

/// Multi-GT PRBS core for GTM and GTYP transceivers.
pub const MULTI_GT: RegisterMap = RegisterMap {
    ctrl: 0x40,
    lane_config: [0x41, 0x42, 0x43, 0x44],
    lane_layout: LaneConfigLayout::MULTI_GT,
    reset_style: ResetStyle::SetBits,
    control: Some(MULTI_GT_CONTROL),
    status: Some(MULTI_GT_STATUS),
    counters: MULTI_GT_COUNTERS,
};

/// Multi-GT PRBS core for GTF transceivers, with per-lane reset status.
pub const MULTI_GT_GTF: RegisterMap = RegisterMap {
    status: Some(StatusLayout {
        lane_status: Some(LaneStatusLayout {
            addrs: [0x62, 0x63, 0x64, 0x65],
            power_good: TriadBits::triad(24),
            tx_done: [
                TriadBits::triad(0),
                TriadBits::triad(3),
                TriadBits::triad(6),
                TriadBits::triad(18),
            ],
            rx_done: [
                TriadBits::triad(9),
                TriadBits::triad(12),
                TriadBits::triad(15),
                TriadBits::triad(21),
            ],
        }),
        ..MULTI_GT_STATUS
    }),
    ..MULTI_GT
};
