//! Test case lifecycle.
//!
//! Every core family has one [`TestCase`] implementation. All of them go through the same
//! phases, driven by [`execute`]:
//!
//! 1. `pre_setup`: resolve the lane configuration and compile the sequence. No hardware access.
//! 2. `run`: execute the steps.
//! 3. `post_teardown`: stop the generators and report the results.
//!
//! `abort` may be called from any thread at any time.
use std::{collections::BTreeMap, sync::Arc};

use gt_registers::MAX_LANES;

use crate::{
    RegisterAccess,
    clock::{AbortFlag, Clock, SystemClock, Ticker},
    config::Config,
    controller::{ResultsMatrix, TestResult},
    device::ComputeUnit,
    error::SetupError,
    kind::TransceiverKind,
    report::ReportSink,
    reset_lock::{ResetDomain, ResetLocks},
    resolver::{GtDefaults, LaneOverrides, NoPlatformDefaults, TestCaseConfig, resolve},
    sequence::{RawStep, TestStep, compile, default_sequence},
};

mod gt_lpbk;
mod gt_prbs;
mod multi_gt;

pub use gt_lpbk::GtLpbkTest;
pub use gt_prbs::GtPrbsTest;
pub use multi_gt::MultiGtTest;

pub trait TestCase: Send {
    fn name(&self) -> String;

    /// Validate the configuration and sequence. Nothing is written to the hardware.
    fn pre_setup(&mut self) -> Result<(), SetupError>;

    fn run(&mut self) -> TestResult;

    fn post_teardown(&mut self);

    fn abort_flag(&self) -> &AbortFlag;

    /// Request the test to stop. Waits in progress end within one tick.
    fn abort(&self) {
        log::warn!("{}: abort", self.name());
        self.abort_flag().abort();
    }

    /// Results of the last run, if it got that far.
    fn results(&self) -> Option<&ResultsMatrix>;
}

/// Run the full lifecycle of `test`.
///
/// `post_teardown` always runs, also when `pre_setup` failed.
pub fn execute(test: &mut dyn TestCase) -> TestResult {
    let name = test.name();
    let result = match test.pre_setup() {
        Ok(()) => test.run(),
        Err(e) => {
            log::error!("{}: {}", name, e);
            TestResult::Failed
        }
    };
    test.post_teardown();
    match result {
        TestResult::Passed => log::info!("{}: test {}", name, result),
        _ => log::error!("{}: test {}", name, result),
    }
    result
}

/// What to test on one GT.
#[derive(Debug, Clone, PartialEq)]
pub struct TestParameters {
    pub gt_index: u32,
    pub global: LaneOverrides,
    pub lanes: BTreeMap<u8, LaneOverrides>,
    /// The kind's default sequence is used if `None`.
    pub sequence: Option<Vec<RawStep>>,
    /// Lane count reported by the core.
    pub reported_lanes: u8,
}

impl TestParameters {
    pub fn new(gt_index: u32) -> TestParameters {
        TestParameters {
            gt_index,
            global: LaneOverrides::default(),
            lanes: BTreeMap::new(),
            sequence: None,
            reported_lanes: MAX_LANES as u8,
        }
    }

    pub fn with_sequence(mut self, sequence: Vec<RawStep>) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_global(mut self, global: LaneOverrides) -> Self {
        self.global = global;
        self
    }

    pub fn with_lane(mut self, lane: u8, overrides: LaneOverrides) -> Self {
        self.lanes.insert(lane, overrides);
        self
    }

    pub fn with_reported_lanes(mut self, lanes: u8) -> Self {
        self.reported_lanes = lanes;
        self
    }
}

/// Services shared by all engines of a process.
#[derive(Clone)]
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub reset_locks: ResetLocks,
    pub defaults: Arc<dyn GtDefaults>,
    pub config: Config,
}

impl Default for Environment {
    fn default() -> Self {
        Environment {
            clock: Arc::new(SystemClock::default()),
            reset_locks: ResetLocks::new(),
            defaults: Arc::new(NoPlatformDefaults),
            config: Config::default(),
        }
    }
}

/// Output of a successful `pre_setup`.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub lane_config: TestCaseConfig,
    pub steps: Vec<TestStep>,
}

/// Resolve and compile everything a test needs.
pub fn prepare(
    kind: TransceiverKind,
    params: &TestParameters,
    env: &Environment,
) -> Result<Prepared, SetupError> {
    let available = kind.available_lanes(params.reported_lanes);
    let lane_config = resolve(
        kind,
        params.gt_index,
        available,
        &params.global,
        &params.lanes,
        env.defaults.as_ref(),
    )?;

    let raw = match &params.sequence {
        Some(sequence) => sequence.clone(),
        None => {
            log::info!("GT {}: no test sequence given, using the default", params.gt_index);
            default_sequence(kind)
        }
    };
    let steps = compile(kind, available, &raw, env.config.max_sequence_errors)?;
    log::info!(
        "GT {}: {} steps, lanes {} enabled of {}",
        params.gt_index,
        steps.len(),
        lane_config.enabled_lanes(),
        available
    );
    Ok(Prepared { lane_config, steps })
}

/// State every test case implementation carries.
pub(crate) struct Station<R> {
    pub kind: TransceiverKind,
    pub cu: ComputeUnit<R>,
    pub params: TestParameters,
    pub env: Environment,
    pub abort: AbortFlag,
    pub domain: ResetDomain,
    pub sink: Box<dyn ReportSink>,
    pub prepared: Option<Prepared>,
    pub results: Option<ResultsMatrix>,
}

impl<R: RegisterAccess> Station<R> {
    pub fn new(
        kind: TransceiverKind,
        regs: R,
        params: TestParameters,
        env: Environment,
        sink: Box<dyn ReportSink>,
    ) -> Station<R> {
        let gt_index = params.gt_index;
        Station {
            kind,
            cu: ComputeUnit::new(regs, kind.register_map(), gt_index),
            domain: env.reset_locks.domain(gt_index),
            params,
            env,
            abort: AbortFlag::new(),
            sink,
            prepared: None,
            results: None,
        }
    }

    pub fn name(&self) -> String {
        format!("{} GT {}", self.kind, self.params.gt_index)
    }

    pub fn ticker(&self) -> Ticker {
        Ticker::new(self.env.clock.clone(), self.abort.clone(), &self.env.config)
    }

    pub fn pre_setup(&mut self) -> Result<&Prepared, SetupError> {
        self.results = None;
        Ok(self
            .prepared
            .insert(prepare(self.kind, &self.params, &self.env)?))
    }

    /// Log the result matrix, one line per iteration.
    pub fn report(&self) {
        let Some(results) = &self.results else {
            return;
        };
        for iteration in 0..results.iterations() {
            let line: Vec<String> = results
                .column(iteration)
                .iter()
                .map(|(lane, result)| format!("lane {}: {}", lane, result))
                .collect();
            log::info!("{}: iteration {}: {}", self.name(), iteration + 1, line.join(", "));
        }
    }
}

/// Create the test case implementation for `kind`.
pub fn new_test_case<R: RegisterAccess + Send + 'static>(
    kind: TransceiverKind,
    regs: R,
    params: TestParameters,
    env: Environment,
    sink: Box<dyn ReportSink>,
) -> Box<dyn TestCase> {
    match kind {
        TransceiverKind::GtPrbs => Box::new(GtPrbsTest::new(regs, params, env, sink)),
        TransceiverKind::GtLpbk => Box::new(GtLpbkTest::new(regs, params, env, sink)),
        TransceiverKind::Gtf | TransceiverKind::Gtm | TransceiverKind::Gtyp => {
            Box::new(MultiGtTest::new(kind, regs, params, env, sink))
        }
    }
}
