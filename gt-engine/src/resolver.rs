//! Lane configuration resolver.
//!
//! Every lane parameter is resolved through the cascade
//!
//! ```text
//! lane override -> global override -> platform default -> hard default
//! ```
//!
//! where the platform default comes from the electrical defaults of the GT for the selected
//! settings source (cable or module). The result is an immutable [`TestCaseConfig`] that also
//! records where each value came from.
use std::{collections::BTreeMap, fmt::Display};

use gt_registers::lane_config::LaneWord;

use crate::{
    error::{ConfigError, ConfigProblem},
    kind::{ThresholdKind, TransceiverKind},
    lane::LaneSet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GtSettingsSource {
    Cable,
    Module,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackMode {
    Disable,
    NearEndPcs,
    NearEndPma,
    FarEndPcs,
    FarEndPma,
}

impl LoopbackMode {
    /// Code written to the loopback field of the lane configuration register.
    pub fn code(self) -> u8 {
        match self {
            LoopbackMode::Disable => 0,
            LoopbackMode::NearEndPcs => 1,
            LoopbackMode::NearEndPma => 2,
            LoopbackMode::FarEndPcs => 4,
            LoopbackMode::FarEndPma => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Normal,
    Inverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxEqualizer {
    Lpm,
    Dfe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorThreshold {
    /// Erroneous words in percent, `0..=100`.
    Percent(u32),
    /// Bit error rate, `0.0..=1.0`.
    Ber(f64),
}

impl Display for ErrorThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorThreshold::Percent(percent) => write!(f, "{}%", percent),
            ErrorThreshold::Ber(ber) => write!(f, "BER {:e}", ber),
        }
    }
}

/// Electrical defaults of one GT for one settings source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GtSettings {
    pub tx_polarity: Polarity,
    pub tx_main_cursor: u32,
    pub tx_diffctrl: u32,
    pub tx_pre_emph: u32,
    pub tx_post_emph: u32,
    pub rx_polarity: Polarity,
    pub rx_equalizer: RxEqualizer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlatformDefaults {
    pub cable: GtSettings,
    pub module: GtSettings,
}

impl PlatformDefaults {
    pub fn settings(&self, source: GtSettingsSource) -> &GtSettings {
        match source {
            GtSettingsSource::Cable => &self.cable,
            GtSettingsSource::Module => &self.module,
        }
    }
}

/// Lookup of platform electrical defaults by GT index.
pub trait GtDefaults: Send + Sync {
    fn platform_defaults(&self, gt_index: u32) -> Option<PlatformDefaults>;
}

/// Platform defaults indexed by GT index.
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    entries: Vec<Option<PlatformDefaults>>,
}

impl DefaultsTable {
    pub fn new() -> DefaultsTable {
        DefaultsTable::default()
    }

    pub fn insert(&mut self, gt_index: u32, defaults: PlatformDefaults) {
        let index = gt_index as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(defaults);
    }
}

impl GtDefaults for DefaultsTable {
    fn platform_defaults(&self, gt_index: u32) -> Option<PlatformDefaults> {
        self.entries.get(gt_index as usize).copied().flatten()
    }
}

/// A platform that provides no defaults.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlatformDefaults;

impl GtDefaults for NoPlatformDefaults {
    fn platform_defaults(&self, _gt_index: u32) -> Option<PlatformDefaults> {
        None
    }
}

/// Optional values of a lane parameter set, as provided by the user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaneOverrides {
    pub gt_settings: Option<GtSettingsSource>,
    pub loopback_mode: Option<LoopbackMode>,
    pub disable_reference_prbs: Option<bool>,
    pub error_threshold: Option<ErrorThreshold>,
    pub tx_diffctrl: Option<u32>,
    pub tx_main_cursor: Option<u32>,
    pub tx_pre_emph: Option<u32>,
    pub tx_post_emph: Option<u32>,
    pub rx_use_lpm: Option<bool>,
    pub tx_polarity: Option<Polarity>,
    pub rx_polarity: Option<Polarity>,
    pub enable: Option<bool>,
}

/// Fully resolved parameters of one lane.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneParameter {
    pub gt_settings: GtSettingsSource,
    pub loopback_mode: LoopbackMode,
    pub disable_reference_prbs: bool,
    pub error_threshold: ErrorThreshold,
    pub tx_diffctrl: u32,
    pub tx_main_cursor: u32,
    pub tx_pre_emph: u32,
    pub tx_post_emph: u32,
    pub rx_use_lpm: bool,
    pub tx_polarity: Polarity,
    pub rx_polarity: Polarity,
    pub enable: bool,
}

impl LaneParameter {
    pub fn hard_default(kind: TransceiverKind) -> LaneParameter {
        LaneParameter {
            gt_settings: GtSettingsSource::Module,
            loopback_mode: LoopbackMode::Disable,
            disable_reference_prbs: false,
            error_threshold: match kind.threshold_kind() {
                ThresholdKind::Percent => ErrorThreshold::Percent(5),
                ThresholdKind::Ber => ErrorThreshold::Ber(1e-9),
            },
            tx_diffctrl: 0,
            tx_main_cursor: 0,
            tx_pre_emph: 0,
            tx_post_emph: 0,
            rx_use_lpm: false,
            tx_polarity: Polarity::Normal,
            rx_polarity: Polarity::Normal,
            enable: true,
        }
    }

    pub fn lane_word(&self) -> LaneWord {
        LaneWord {
            loopback: self.loopback_mode.code(),
            rx_lpm: self.rx_use_lpm,
            rx_polarity: self.rx_polarity == Polarity::Inverted,
            tx_polarity: self.tx_polarity == Polarity::Inverted,
            tx_post_emph: self.tx_post_emph as u8,
            tx_main_cursor: self.tx_main_cursor as u8,
            tx_pre_emph: self.tx_pre_emph as u8,
            tx_diffctrl: self.tx_diffctrl as u8,
        }
    }

    /// Threshold in its own unit: erroneous words in percent or bit error rate.
    pub fn error_limit(&self) -> f64 {
        match self.error_threshold {
            ErrorThreshold::Percent(percent) => f64::from(percent),
            ErrorThreshold::Ber(ber) => ber,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamField {
    GtSettings,
    LoopbackMode,
    DisableReferencePrbs,
    ErrorThreshold,
    TxDiffctrl,
    TxMainCursor,
    TxPreEmph,
    TxPostEmph,
    RxUseLpm,
    TxPolarity,
    RxPolarity,
    Enable,
}

impl ParamField {
    pub const ALL: [ParamField; 12] = [
        ParamField::GtSettings,
        ParamField::LoopbackMode,
        ParamField::DisableReferencePrbs,
        ParamField::ErrorThreshold,
        ParamField::TxDiffctrl,
        ParamField::TxMainCursor,
        ParamField::TxPreEmph,
        ParamField::TxPostEmph,
        ParamField::RxUseLpm,
        ParamField::TxPolarity,
        ParamField::RxPolarity,
        ParamField::Enable,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ParamField::GtSettings => "gt_settings",
            ParamField::LoopbackMode => "gt_loopback",
            ParamField::DisableReferencePrbs => "disable_reference_prbs",
            ParamField::ErrorThreshold => "error_threshold",
            ParamField::TxDiffctrl => "gt_tx_diffctrl",
            ParamField::TxMainCursor => "gt_tx_main_cursor",
            ParamField::TxPreEmph => "gt_tx_pre_emph",
            ParamField::TxPostEmph => "gt_tx_post_emph",
            ParamField::RxUseLpm => "gt_rx_use_lpm",
            ParamField::TxPolarity => "gt_tx_polarity",
            ParamField::RxPolarity => "gt_rx_polarity",
            ParamField::Enable => "enable",
        }
    }
}

impl Display for ParamField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provenance {
    LaneOverride,
    GlobalOverride,
    Platform,
    #[default]
    HardDefault,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub provenance: Provenance,
}

/// Resolve one field: an override wins over a platform value, which wins over the default.
///
/// `source` is the provenance recorded when the override is taken.
pub fn cascade<T>(
    default: Resolved<T>,
    platform: Option<T>,
    overriding: Option<T>,
    source: Provenance,
) -> Resolved<T> {
    match (overriding, platform) {
        (Some(value), _) => Resolved {
            value,
            provenance: source,
        },
        (None, Some(value)) => Resolved {
            value,
            provenance: Provenance::Platform,
        },
        (None, None) => default,
    }
}

/// Provenance of every field of one lane parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Provenances([Provenance; ParamField::ALL.len()]);

impl Provenances {
    pub fn get(&self, field: ParamField) -> Provenance {
        self.0[field as usize]
    }

    fn set(&mut self, field: ParamField, provenance: Provenance) {
        self.0[field as usize] = provenance;
    }
}

/// Immutable, validated configuration of one GT.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseConfig {
    pub global: LaneParameter,
    lanes: BTreeMap<u8, LaneParameter>,
    global_provenance: Provenances,
    lane_provenance: BTreeMap<u8, Provenances>,
}

impl TestCaseConfig {
    pub fn lane(&self, lane: u8) -> Option<&LaneParameter> {
        self.lanes.get(&lane)
    }

    pub fn lanes(&self) -> impl Iterator<Item = (u8, &LaneParameter)> {
        self.lanes.iter().map(|(lane, param)| (*lane, param))
    }

    pub fn available_lanes(&self) -> LaneSet {
        self.lanes.keys().copied().collect()
    }

    pub fn enabled_lanes(&self) -> LaneSet {
        self.lanes()
            .filter(|(_, param)| param.enable)
            .map(|(lane, _)| lane)
            .collect()
    }

    /// Provenance of `field` of `lane`, or of the global configuration if `lane` is `None`.
    pub fn provenance(&self, lane: Option<u8>, field: ParamField) -> Option<Provenance> {
        match lane {
            None => Some(self.global_provenance.get(field)),
            Some(lane) => self.lane_provenance.get(&lane).map(|p| p.get(field)),
        }
    }
}

struct Level<'a> {
    base: &'a LaneParameter,
    base_provenance: Provenances,
    platform: Option<&'a GtSettings>,
    overrides: &'a LaneOverrides,
    source: Provenance,
}

impl Level<'_> {
    fn pick<T>(
        &self,
        provenance: &mut Provenances,
        field: ParamField,
        base: T,
        platform: Option<T>,
        overriding: Option<T>,
    ) -> T {
        let base = Resolved {
            value: base,
            provenance: self.base_provenance.get(field),
        };
        let resolved = cascade(base, platform, overriding, self.source);
        provenance.set(field, resolved.provenance);
        resolved.value
    }

    fn resolve(&self) -> (LaneParameter, Provenances) {
        let mut p = self.base_provenance;
        let (b, o, platform) = (self.base, self.overrides, self.platform);
        let param = LaneParameter {
            gt_settings: self.pick(&mut p, ParamField::GtSettings, b.gt_settings, None, o.gt_settings),
            loopback_mode: self.pick(
                &mut p,
                ParamField::LoopbackMode,
                b.loopback_mode,
                None,
                o.loopback_mode,
            ),
            disable_reference_prbs: self.pick(
                &mut p,
                ParamField::DisableReferencePrbs,
                b.disable_reference_prbs,
                None,
                o.disable_reference_prbs,
            ),
            error_threshold: self.pick(
                &mut p,
                ParamField::ErrorThreshold,
                b.error_threshold,
                None,
                o.error_threshold,
            ),
            tx_diffctrl: self.pick(
                &mut p,
                ParamField::TxDiffctrl,
                b.tx_diffctrl,
                platform.map(|s| s.tx_diffctrl),
                o.tx_diffctrl,
            ),
            tx_main_cursor: self.pick(
                &mut p,
                ParamField::TxMainCursor,
                b.tx_main_cursor,
                platform.map(|s| s.tx_main_cursor),
                o.tx_main_cursor,
            ),
            tx_pre_emph: self.pick(
                &mut p,
                ParamField::TxPreEmph,
                b.tx_pre_emph,
                platform.map(|s| s.tx_pre_emph),
                o.tx_pre_emph,
            ),
            tx_post_emph: self.pick(
                &mut p,
                ParamField::TxPostEmph,
                b.tx_post_emph,
                platform.map(|s| s.tx_post_emph),
                o.tx_post_emph,
            ),
            rx_use_lpm: self.pick(
                &mut p,
                ParamField::RxUseLpm,
                b.rx_use_lpm,
                platform.map(|s| s.rx_equalizer == RxEqualizer::Lpm),
                o.rx_use_lpm,
            ),
            tx_polarity: self.pick(
                &mut p,
                ParamField::TxPolarity,
                b.tx_polarity,
                platform.map(|s| s.tx_polarity),
                o.tx_polarity,
            ),
            rx_polarity: self.pick(
                &mut p,
                ParamField::RxPolarity,
                b.rx_polarity,
                platform.map(|s| s.rx_polarity),
                o.rx_polarity,
            ),
            enable: self.pick(&mut p, ParamField::Enable, b.enable, None, o.enable),
        };
        (param, p)
    }
}

const DIFFCTRL_MAX: u32 = 31;
const MAIN_CURSOR_MAX: u32 = 127;
const PRE_EMPH_MAX: u32 = 31;
const POST_EMPH_MAX: u32 = 31;
const PERCENT_MAX: u32 = 100;

/// Check the fields of `param` whose provenance is in `checked`.
fn validate(
    kind: TransceiverKind,
    lane: Option<u8>,
    param: &LaneParameter,
    provenance: &Provenances,
    checked: &[Provenance],
    problems: &mut Vec<ConfigProblem>,
) {
    let mut check_range = |field: ParamField, value: u32, max: u32| {
        if checked.contains(&provenance.get(field)) && value > max {
            problems.push(ConfigProblem::InvalidValue {
                lane,
                field,
                value: value.to_string(),
                allowed: format!("[0, {}]", max),
            });
        }
    };
    check_range(ParamField::TxDiffctrl, param.tx_diffctrl, DIFFCTRL_MAX);
    check_range(ParamField::TxMainCursor, param.tx_main_cursor, MAIN_CURSOR_MAX);
    check_range(ParamField::TxPreEmph, param.tx_pre_emph, PRE_EMPH_MAX);
    check_range(ParamField::TxPostEmph, param.tx_post_emph, POST_EMPH_MAX);

    if !checked.contains(&provenance.get(ParamField::ErrorThreshold)) {
        return;
    }
    let allowed = match (kind.threshold_kind(), param.error_threshold) {
        (ThresholdKind::Percent, ErrorThreshold::Percent(percent)) if percent <= PERCENT_MAX => {
            None
        }
        (ThresholdKind::Ber, ErrorThreshold::Ber(ber)) if (0.0..=1.0).contains(&ber) => None,
        (ThresholdKind::Percent, _) => Some(format!("percent in [0, {}]", PERCENT_MAX)),
        (ThresholdKind::Ber, _) => Some("BER in [0, 1]".to_string()),
    };
    if let Some(allowed) = allowed {
        problems.push(ConfigProblem::InvalidValue {
            lane,
            field: ParamField::ErrorThreshold,
            value: param.error_threshold.to_string(),
            allowed,
        });
    }
}

/// Resolve the configuration of one GT.
///
/// All problems are collected and reported together.
pub fn resolve(
    kind: TransceiverKind,
    gt_index: u32,
    available: LaneSet,
    global: &LaneOverrides,
    per_lane: &BTreeMap<u8, LaneOverrides>,
    defaults: &dyn GtDefaults,
) -> Result<TestCaseConfig, ConfigError> {
    let mut problems = Vec::new();
    let hard = LaneParameter::hard_default(kind);
    let source = global.gt_settings.unwrap_or(hard.gt_settings);
    let platform = defaults.platform_defaults(gt_index);
    match &platform {
        Some(_) => log::debug!("GT {}: using {:?} platform defaults", gt_index, source),
        None => log::debug!("GT {}: no platform defaults, using built-in values", gt_index),
    }

    let (global_param, global_provenance) = Level {
        base: &hard,
        base_provenance: Provenances::default(),
        platform: platform.as_ref().map(|p| p.settings(source)),
        overrides: global,
        source: Provenance::GlobalOverride,
    }
    .resolve();
    validate(
        kind,
        None,
        &global_param,
        &global_provenance,
        &[
            Provenance::GlobalOverride,
            Provenance::Platform,
            Provenance::HardDefault,
        ],
        &mut problems,
    );

    for lane in per_lane.keys().filter(|lane| !available.contains(**lane)) {
        problems.push(ConfigProblem::UnknownLane {
            lane: *lane,
            available,
        });
    }

    let no_overrides = LaneOverrides::default();
    let mut lanes = BTreeMap::new();
    let mut lane_provenance = BTreeMap::new();
    for lane in available.iter() {
        let (param, provenance) = Level {
            base: &global_param,
            base_provenance: global_provenance,
            platform: None,
            overrides: per_lane.get(&lane).unwrap_or(&no_overrides),
            source: Provenance::LaneOverride,
        }
        .resolve();
        validate(
            kind,
            Some(lane),
            &param,
            &provenance,
            &[Provenance::LaneOverride],
            &mut problems,
        );
        log::debug!(
            "GT {} lane {}: enable={}, loopback={:?}, diffctrl={}, main={}, pre={}, post={}, lpm={}, tx_pol={:?}, rx_pol={:?}, threshold={}",
            gt_index,
            lane,
            param.enable,
            param.loopback_mode,
            param.tx_diffctrl,
            param.tx_main_cursor,
            param.tx_pre_emph,
            param.tx_post_emph,
            param.rx_use_lpm,
            param.tx_polarity,
            param.rx_polarity,
            param.error_threshold
        );
        lanes.insert(lane, param);
        lane_provenance.insert(lane, provenance);
    }

    if !lanes.values().any(|param| param.enable) {
        problems.push(ConfigProblem::NoLaneEnabled);
    }

    if !problems.is_empty() {
        return Err(ConfigError { problems });
    }
    Ok(TestCaseConfig {
        global: global_param,
        lanes,
        global_provenance,
        lane_provenance,
    })
}
