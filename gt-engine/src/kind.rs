//! Per-kind constants.
use std::{fmt::Display, str::FromStr};

use gt_registers::map::{GT_LPBK, GT_PRBS, MULTI_GT, MULTI_GT_GTF, RegisterMap};

use crate::lane::LaneSet;

/// The transceiver test cores supported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransceiverKind {
    /// Quad-lane PRBS core with simple split counters.
    GtPrbs,
    /// Quad-lane loopback core, configuration only.
    GtLpbk,
    /// Multi-GT PRBS core on GTF transceivers.
    Gtf,
    /// Multi-GT PRBS core on GTM transceivers.
    Gtm,
    /// Multi-GT PRBS core on GTYP transceivers.
    Gtyp,
}

/// Kind of error threshold a core is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdKind {
    /// Erroneous words in percent of all received words.
    Percent,
    /// Bit error rate.
    Ber,
}

/// Expected line rate of a core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateProfile {
    /// Bits carried by one counted word.
    pub unit_bits: u32,
    pub nominal_rate_gbps: f64,
    pub tolerance_percent: f64,
}

impl RateProfile {
    pub fn low(&self) -> f64 {
        self.nominal_rate_gbps * (1.0 - self.tolerance_percent / 100.0)
    }

    pub fn high(&self) -> f64 {
        self.nominal_rate_gbps * (1.0 + self.tolerance_percent / 100.0)
    }

    /// Whether `rate_gbps` lies strictly inside the band.
    pub fn contains(&self, rate_gbps: f64) -> bool {
        rate_gbps > self.low() && rate_gbps < self.high()
    }

    /// Line rate in Gbps of `word_count` words received over `duration_seconds`.
    pub fn rate_gbps(&self, word_count: u64, duration_seconds: u32) -> f64 {
        if duration_seconds == 0 {
            return 0.0;
        }
        (word_count as f64 * f64::from(self.unit_bits)) / (f64::from(duration_seconds) * 1e9)
    }
}

const RATE_25GBE: RateProfile = RateProfile {
    unit_bits: 64,
    nominal_rate_gbps: 25.781_25,
    tolerance_percent: 0.5,
};

const RATE_10GBE: RateProfile = RateProfile {
    unit_bits: 32,
    nominal_rate_gbps: 10.3125,
    tolerance_percent: 0.5,
};

const RATE_56GBE: RateProfile = RateProfile {
    unit_bits: 128,
    nominal_rate_gbps: 56.42,
    tolerance_percent: 0.5,
};

const RATE_32GBS: RateProfile = RateProfile {
    unit_bits: 66,
    nominal_rate_gbps: 32.0,
    tolerance_percent: 0.5,
};

/// Longest step of cores with 64-bit counters.
pub const MAX_DURATION: u32 = u32::MAX;
/// Longest step of Multi-GT cores, bounded by their 48-bit counters.
pub const MAX_DURATION_MULTI_GT: u32 = 172_800;

impl TransceiverKind {
    pub const ALL: [TransceiverKind; 5] = [
        TransceiverKind::GtPrbs,
        TransceiverKind::GtLpbk,
        TransceiverKind::Gtf,
        TransceiverKind::Gtm,
        TransceiverKind::Gtyp,
    ];

    pub fn register_map(self) -> &'static RegisterMap {
        match self {
            TransceiverKind::GtPrbs => &GT_PRBS,
            TransceiverKind::GtLpbk => &GT_LPBK,
            TransceiverKind::Gtf => &MULTI_GT_GTF,
            TransceiverKind::Gtm | TransceiverKind::Gtyp => &MULTI_GT,
        }
    }

    pub fn rate_profile(self) -> RateProfile {
        match self {
            TransceiverKind::GtPrbs | TransceiverKind::GtLpbk => RATE_25GBE,
            TransceiverKind::Gtf => RATE_10GBE,
            TransceiverKind::Gtm => RATE_56GBE,
            TransceiverKind::Gtyp => RATE_32GBS,
        }
    }

    pub fn threshold_kind(self) -> ThresholdKind {
        if self.is_multi_gt() {
            ThresholdKind::Ber
        } else {
            ThresholdKind::Percent
        }
    }

    pub fn max_duration(self) -> u32 {
        if self.is_multi_gt() {
            MAX_DURATION_MULTI_GT
        } else {
            MAX_DURATION
        }
    }

    pub fn is_multi_gt(self) -> bool {
        matches!(
            self,
            TransceiverKind::Gtf | TransceiverKind::Gtm | TransceiverKind::Gtyp
        )
    }

    /// Lanes of the compute unit.
    ///
    /// Quad cores always have four lanes. Multi-GT cores report their lane count.
    pub fn available_lanes(self, reported_lanes: u8) -> LaneSet {
        match self {
            TransceiverKind::GtPrbs | TransceiverKind::GtLpbk => LaneSet::ALL,
            _ if reported_lanes == 1 => LaneSet::single(0),
            _ => LaneSet::ALL,
        }
    }

    /// File name prefix of measurement output.
    pub fn output_prefix(self) -> &'static str {
        match self {
            TransceiverKind::GtPrbs => "gtprbs",
            TransceiverKind::GtLpbk => "gtlpbk",
            TransceiverKind::Gtf => "gtfprbs",
            TransceiverKind::Gtm => "gtmprbs",
            TransceiverKind::Gtyp => "gtypprbs",
        }
    }
}

impl Display for TransceiverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransceiverKind::GtPrbs => "GT_PRBS",
            TransceiverKind::GtLpbk => "GT_LPBK",
            TransceiverKind::Gtf => "GTF_PRBS",
            TransceiverKind::Gtm => "GTM_PRBS",
            TransceiverKind::Gtyp => "GTYP_PRBS",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for TransceiverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "gt_prbs" => Ok(TransceiverKind::GtPrbs),
            "gt_lpbk" => Ok(TransceiverKind::GtLpbk),
            "gtf" | "gtf_prbs" => Ok(TransceiverKind::Gtf),
            "gtm" | "gtm_prbs" => Ok(TransceiverKind::Gtm),
            "gtyp" | "gtyp_prbs" => Ok(TransceiverKind::Gtyp),
            other => Err(format!(
                "Unknown transceiver kind '{}', expected one of gt_prbs, gt_lpbk, gtf, gtm, gtyp",
                other
            )),
        }
    }
}
