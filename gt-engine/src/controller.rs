//! Iteration controller and lane result aggregation.
//!
//! The controller walks the compiled steps. For each step it lets a [`StepDriver`] issue the
//! step's action, waits for the step duration, lets the driver run the step's checks and then
//! records one [`IterationResult`] per lane. During sampled run steps, every lane a sample
//! marks as failing fails the step.
//!
//! The controller is the only place that decides whether a failure is fatal. Checks report
//! through [`StepContext::record`], which applies the policy:
//!
//! | check        | bring-up | measurement |
//! |--------------|----------|-------------|
//! | power good   | fatal    | lane        |
//! | PLL lock     | fatal if not locked, lane on edges | same |
//! | reset over   | fatal    | fatal       |
//! | reset stable | lane     | lane        |
//!
//! A fatal failure raises the abort flag. The current and all following iterations are then
//! recorded as aborted.
use std::{collections::BTreeMap, fmt::Display, time::Duration};

use crate::{
    clock::Ticker,
    error::{Check, EngineError},
    lane::LaneSet,
    monitor::LaneResult,
    report::{MeasurementRecord, ReportSink},
    sequence::{Command, TestStep},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationResult {
    NotTested,
    Disabled,
    Passed,
    Failed,
    Aborted,
}

impl Display for IterationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            IterationResult::NotTested => "NOT TESTED",
            IterationResult::Disabled => "DISABLED",
            IterationResult::Passed => "PASSED",
            IterationResult::Failed => "FAILED",
            IterationResult::Aborted => "ABORTED",
        };
        write!(f, "{}", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    Failed,
    Aborted,
}

impl Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TestResult::Passed => "PASSED",
            TestResult::Failed => "FAILED",
            TestResult::Aborted => "ABORTED",
        };
        write!(f, "{}", text)
    }
}

/// Result of every lane in every iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultsMatrix {
    lanes: BTreeMap<u8, Vec<IterationResult>>,
    iterations: usize,
}

impl ResultsMatrix {
    pub fn new(available: LaneSet, iterations: usize) -> ResultsMatrix {
        ResultsMatrix {
            lanes: available
                .iter()
                .map(|lane| (lane, vec![IterationResult::NotTested; iterations]))
                .collect(),
            iterations,
        }
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Results of `lane`, indexed by iteration starting at zero.
    pub fn lane(&self, lane: u8) -> Option<&[IterationResult]> {
        self.lanes.get(&lane).map(Vec::as_slice)
    }

    pub fn get(&self, lane: u8, iteration: usize) -> Option<IterationResult> {
        self.lane(lane)
            .and_then(|results| results.get(iteration))
            .copied()
    }

    /// Results of all lanes in one iteration.
    pub fn column(&self, iteration: usize) -> Vec<(u8, IterationResult)> {
        self.lanes
            .iter()
            .filter_map(|(lane, results)| results.get(iteration).map(|result| (*lane, *result)))
            .collect()
    }

    fn set(&mut self, lane: u8, iteration: usize, result: IterationResult) {
        if let Some(slot) = self
            .lanes
            .get_mut(&lane)
            .and_then(|results| results.get_mut(iteration))
        {
            *slot = result;
        }
    }

    fn record(&mut self, iteration: usize, enabled: LaneSet, failed: LaneSet) {
        let lanes: Vec<u8> = self.lanes.keys().copied().collect();
        for lane in lanes {
            let result = if !enabled.contains(lane) {
                IterationResult::Disabled
            } else if failed.contains(lane) {
                IterationResult::Failed
            } else {
                IterationResult::Passed
            };
            self.set(lane, iteration, result);
        }
    }

    /// Mark `iteration` and every later one as aborted. Disabled lanes stay disabled.
    fn abort_from(&mut self, iteration: usize, enabled: LaneSet) {
        for (lane, results) in self.lanes.iter_mut() {
            let result = if enabled.contains(*lane) {
                IterationResult::Aborted
            } else {
                IterationResult::Disabled
            };
            for slot in results.iter_mut().skip(iteration) {
                *slot = result;
            }
        }
    }

    pub fn log_summary(&self, gt_index: u32) {
        for (lane, results) in &self.lanes {
            let passed = results
                .iter()
                .filter(|result| **result == IterationResult::Passed)
                .count();
            let failed = results
                .iter()
                .filter(|result| **result == IterationResult::Failed)
                .count();
            let line: Vec<String> = results.iter().map(ToString::to_string).collect();
            log::info!(
                "GT {}: lane {}: {} passed, {} failed: {}",
                gt_index,
                lane,
                passed,
                failed,
                line.join(", ")
            );
        }
    }
}

/// Where in the test a check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Bringing the link up: configuration and reset actions.
    BringUp,
    /// Verifying a link that is expected to be up.
    Measurement,
}

/// Failures collected while one step is executed.
#[derive(Debug)]
pub struct StepContext {
    enabled: LaneSet,
    failed: LaneSet,
}

impl StepContext {
    pub fn new(enabled: LaneSet) -> StepContext {
        StepContext {
            enabled,
            failed: LaneSet::EMPTY,
        }
    }

    pub fn enabled(&self) -> LaneSet {
        self.enabled
    }

    pub fn failed(&self) -> LaneSet {
        self.failed
    }

    /// Fail `lanes` in this step. Lanes that are not enabled are ignored.
    pub fn fail_lanes(&mut self, lanes: LaneSet) {
        self.failed = self.failed.union(lanes.intersection(self.enabled));
    }

    /// Fail every enabled lane in this step.
    pub fn fail_step(&mut self) {
        self.failed = self.enabled;
    }

    /// Attribute the outcome of a check.
    ///
    /// Isolated failures are recorded against their lanes and turned into `Ok`. Fatal
    /// failures are recorded as well and returned.
    pub fn record(&mut self, outcome: Result<(), EngineError>, phase: Phase) -> Result<(), EngineError> {
        match outcome {
            Ok(()) => Ok(()),
            Err(EngineError::Handshake(failure)) => {
                self.fail_lanes(failure.lanes);
                let fatal = match failure.check {
                    Check::ResetOver => true,
                    Check::PllLock => failure.live_lost,
                    Check::PowerGood => phase == Phase::BringUp,
                    Check::ResetStable => false,
                };
                if fatal {
                    Err(EngineError::Handshake(failure))
                } else {
                    log::warn!("{}", failure);
                    Ok(())
                }
            }
            Err(EngineError::Aborted) => Err(EngineError::Aborted),
            Err(e) => {
                self.fail_step();
                Err(e)
            }
        }
    }
}

/// Kind-specific actions and checks of the steps.
pub trait StepDriver {
    /// Issue the action of `step`, before its duration elapses.
    fn begin(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError>;

    /// Run the checks of `step`, after its duration elapsed.
    fn finish(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError>;

    /// Whether run steps are paced by the hardware second toggle and sampled.
    fn samples_hw_tick(&self) -> bool {
        false
    }

    fn start_sampling(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Wait for the next hardware second. Returns whether the toggle was seen.
    fn wait_for_hw_tick(&mut self, ticker: &Ticker) -> Result<bool, EngineError> {
        ticker.wait_ticks(1);
        Ok(true)
    }

    fn sample(&mut self, _global_time_seconds: u64) -> Result<Option<MeasurementRecord>, EngineError> {
        Ok(None)
    }
}

pub struct IterationController<'a> {
    gt_index: u32,
    available: LaneSet,
    enabled: LaneSet,
    ticker: &'a Ticker,
}

impl<'a> IterationController<'a> {
    pub fn new(
        gt_index: u32,
        available: LaneSet,
        enabled: LaneSet,
        ticker: &'a Ticker,
    ) -> IterationController<'a> {
        IterationController {
            gt_index,
            available,
            enabled,
            ticker,
        }
    }

    /// Execute `steps` and aggregate the results.
    pub fn run(
        &self,
        steps: &[TestStep],
        driver: &mut dyn StepDriver,
        sink: &mut dyn ReportSink,
    ) -> (TestResult, ResultsMatrix) {
        let gt = self.gt_index;
        let total = steps.len();
        let mut results = ResultsMatrix::new(self.available, total);
        let mut any_failed = false;

        log::debug!("GT {}: {} test iterations", gt, total);
        for (index, step) in steps.iter().enumerate() {
            let iteration = index + 1;
            if self.ticker.is_aborted() {
                results.abort_from(index, self.enabled);
                break;
            }

            log::info!(
                "GT {}: Start iteration {}/{}: {}",
                gt,
                iteration,
                total,
                step.provided()
            );
            log::debug!("GT {}: extrapolated step: {}", gt, step.extrapolated());

            let mut ctx = StepContext::new(self.enabled);
            match self.execute(step, driver, sink, &mut ctx) {
                Ok(()) | Err(EngineError::Aborted) => {}
                Err(e) => {
                    log::error!("GT {}: iteration {}: {}, aborting", gt, iteration, e);
                    ctx.fail_step();
                    self.ticker.abort_flag().abort();
                }
            }

            if self.ticker.is_aborted() {
                log::error!("GT {}: iteration {} aborted", gt, iteration);
                results.abort_from(index, self.enabled);
                sink.iteration_done(iteration, &results.column(index));
                break;
            }

            results.record(index, self.enabled, ctx.failed());
            if ctx.failed().is_empty() {
                log::info!("GT {}: iteration {} passed", gt, iteration);
            } else {
                any_failed = true;
                log::error!(
                    "GT {}: iteration {} failed on lanes {}",
                    gt,
                    iteration,
                    ctx.failed()
                );
            }
            sink.iteration_done(iteration, &results.column(index));
        }

        let result = if self.ticker.is_aborted() {
            TestResult::Aborted
        } else if any_failed {
            TestResult::Failed
        } else {
            TestResult::Passed
        };
        results.log_summary(gt);
        (result, results)
    }

    fn execute(
        &self,
        step: &TestStep,
        driver: &mut dyn StepDriver,
        sink: &mut dyn ReportSink,
        ctx: &mut StepContext,
    ) -> Result<(), EngineError> {
        driver.begin(step, ctx)?;
        if step.command == Command::Run && driver.samples_hw_tick() {
            self.sample_run(step, driver, sink, ctx)?;
        } else {
            self.wait(step);
        }
        if self.ticker.is_aborted() {
            return Err(EngineError::Aborted);
        }
        log::debug!("GT {}: step duration reached", self.gt_index);
        driver.finish(step, ctx)
    }

    fn progress(&self, step: &TestStep, remaining: u32) {
        let divider = (step.duration / 10).max(1);
        if remaining == step.duration || remaining % divider == 0 {
            let done = 100 * u64::from(step.duration - remaining) / u64::from(step.duration);
            log::info!(
                "GT {}: {}% done, {} s remaining",
                self.gt_index,
                done,
                remaining
            );
        }
    }

    /// Run steps check the abort flag every fast tick, other steps once per tick.
    fn wait(&self, step: &TestStep) {
        for remaining in (1..=step.duration).rev() {
            self.progress(step, remaining);
            let completed = if step.command == Command::Run {
                self.ticker.wait_polling_fast(Duration::from_secs(1))
            } else {
                self.ticker.wait_ticks(1)
            };
            if !completed {
                break;
            }
        }
    }

    fn sample_run(
        &self,
        step: &TestStep,
        driver: &mut dyn StepDriver,
        sink: &mut dyn ReportSink,
        ctx: &mut StepContext,
    ) -> Result<(), EngineError> {
        let start = self.ticker.now();
        let duration = Duration::from_secs(step.duration.into());
        let mut last_second = None;
        driver.start_sampling()?;

        while self.ticker.now().saturating_sub(start) < duration && !self.ticker.is_aborted() {
            driver.wait_for_hw_tick(self.ticker)?;
            let now = self.ticker.now();
            if let Some(record) = driver.sample(now.as_secs())? {
                // a failed sample fails the lane for this run step
                ctx.fail_lanes(
                    record
                        .lanes
                        .iter()
                        .filter(|(_, status)| status.result == LaneResult::Fail)
                        .map(|(lane, _)| *lane)
                        .collect(),
                );
                if !self.ticker.is_aborted() {
                    sink.measurement(&record);
                }
            }

            let elapsed = now.saturating_sub(start).as_secs();
            if last_second != Some(elapsed) {
                last_second = Some(elapsed);
                let remaining = u64::from(step.duration).saturating_sub(elapsed);
                if remaining > 0 {
                    self.progress(step, remaining as u32);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        clock::{AbortFlag, Clock, test::AbortingClock, test::ManualClock},
        config::Config,
        error::HandshakeFailure,
        kind::TransceiverKind,
        report::NullSink,
        sequence::{RawStep, compile},
    };

    fn steps(raw: &[(u32, &str)]) -> Vec<TestStep> {
        let raw: Vec<_> = raw
            .iter()
            .map(|(duration, mode)| RawStep::new(*duration, *mode))
            .collect();
        compile(TransceiverKind::Gtf, LaneSet::ALL, &raw, 20).unwrap()
    }

    /// Driver that fails configured lanes at given iterations.
    #[derive(Default)]
    struct ScriptedDriver {
        begun: Vec<Command>,
        finished: Vec<Command>,
        lane_failures: BTreeMap<usize, LaneSet>,
        fatal_at: Option<usize>,
    }

    impl StepDriver for ScriptedDriver {
        fn begin(&mut self, step: &TestStep, _ctx: &mut StepContext) -> Result<(), EngineError> {
            self.begun.push(step.command);
            Ok(())
        }

        fn finish(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError> {
            self.finished.push(step.command);
            let iteration = self.finished.len();
            if let Some(lanes) = self.lane_failures.get(&iteration) {
                ctx.fail_lanes(*lanes);
            }
            if self.fatal_at == Some(iteration) {
                ctx.record(
                    Err(HandshakeFailure {
                        check: Check::ResetOver,
                        lanes: ctx.enabled(),
                        live_lost: true,
                        attempts: Some(5),
                    }
                    .into()),
                    Phase::BringUp,
                )?;
            }
            Ok(())
        }
    }

    fn ticker(clock: Arc<dyn Clock>, abort: AbortFlag) -> Ticker {
        Ticker::new(clock, abort, &Config::default())
    }

    #[test]
    fn all_steps_pass() {
        let clock = Arc::new(ManualClock::default());
        let ticker = ticker(clock.clone(), AbortFlag::new());
        let controller = IterationController::new(0, LaneSet::ALL, LaneSet::ALL, &ticker);
        let mut driver = ScriptedDriver::default();
        let steps = steps(&[(1, "conf_gt"), (3, "clear_status"), (2, "check_status")]);

        let (result, matrix) = controller.run(&steps, &mut driver, &mut NullSink);
        assert_eq!(result, TestResult::Passed);
        assert_eq!(driver.finished.len(), 3);
        assert_eq!(clock.now(), Duration::from_secs(6));
        assert_eq!(matrix.get(3, 2), Some(IterationResult::Passed));
    }

    #[test]
    fn lane_failures_are_isolated() {
        let ticker = ticker(Arc::new(ManualClock::default()), AbortFlag::new());
        let enabled = LaneSet::from_bits(0b1011);
        let controller = IterationController::new(0, LaneSet::ALL, enabled, &ticker);
        let mut driver = ScriptedDriver::default();
        // lane 2 is disabled, failing it has no effect
        driver.lane_failures.insert(2, LaneSet::from_bits(0b0101));
        let steps = steps(&[(1, "conf_gt"), (1, "check_status"), (1, "run")]);

        let (result, matrix) = controller.run(&steps, &mut driver, &mut NullSink);
        assert_eq!(result, TestResult::Failed);
        assert_eq!(
            matrix.column(1),
            vec![
                (0, IterationResult::Failed),
                (1, IterationResult::Passed),
                (2, IterationResult::Disabled),
                (3, IterationResult::Passed),
            ]
        );
        assert_eq!(matrix.get(0, 2), Some(IterationResult::Passed));
        assert!(
            matrix
                .lane(2)
                .unwrap()
                .iter()
                .all(|result| *result == IterationResult::Disabled)
        );
    }

    #[test]
    fn fatal_failure_aborts_remaining_iterations() {
        let abort = AbortFlag::new();
        let ticker = ticker(Arc::new(ManualClock::default()), abort.clone());
        let enabled = LaneSet::from_bits(0b0111);
        let controller = IterationController::new(0, LaneSet::ALL, enabled, &ticker);
        let mut driver = ScriptedDriver {
            fatal_at: Some(2),
            ..ScriptedDriver::default()
        };
        let steps = steps(&[(1, "conf_gt"), (1, "tx_rx_rst"), (1, "run"), (1, "check_status")]);

        let (result, matrix) = controller.run(&steps, &mut driver, &mut NullSink);
        assert_eq!(result, TestResult::Aborted);
        assert!(abort.is_aborted());
        assert_eq!(driver.begun.len(), 2);
        assert_eq!(
            matrix.lane(0).unwrap(),
            &[
                IterationResult::Passed,
                IterationResult::Aborted,
                IterationResult::Aborted,
                IterationResult::Aborted
            ]
        );
        assert_eq!(matrix.get(3, 3), Some(IterationResult::Disabled));
    }

    #[test]
    fn external_abort_during_wait() {
        let abort = AbortFlag::new();
        let clock = Arc::new(AbortingClock {
            inner: ManualClock::default(),
            abort_at: Duration::from_secs(15),
            abort: abort.clone(),
        });
        let ticker = ticker(clock.clone(), abort);
        let controller = IterationController::new(0, LaneSet::ALL, LaneSet::ALL, &ticker);
        let mut driver = ScriptedDriver::default();
        let steps = steps(&[(10, "conf_gt"), (10, "run"), (10, "run"), (10, "check_status")]);

        let (result, matrix) = controller.run(&steps, &mut driver, &mut NullSink);
        assert_eq!(result, TestResult::Aborted);
        // the aborted step is never checked
        assert_eq!(driver.finished, vec![Command::ConfigureLink]);
        assert_eq!(clock.now(), Duration::from_secs(15));
        for lane in 0..4 {
            assert_eq!(
                matrix.lane(lane).unwrap(),
                &[
                    IterationResult::Passed,
                    IterationResult::Aborted,
                    IterationResult::Aborted,
                    IterationResult::Aborted
                ]
            );
        }
    }

    #[test]
    fn run_wait_sees_abort_within_a_fast_tick() {
        let abort = AbortFlag::new();
        let clock = Arc::new(AbortingClock {
            inner: ManualClock::default(),
            abort_at: Duration::from_millis(15_500),
            abort: abort.clone(),
        });
        let ticker = ticker(clock.clone(), abort);
        let controller = IterationController::new(0, LaneSet::ALL, LaneSet::ALL, &ticker);
        let mut driver = ScriptedDriver::default();
        let steps = steps(&[(10, "conf_gt"), (10, "run")]);

        let (result, _) = controller.run(&steps, &mut driver, &mut NullSink);
        assert_eq!(result, TestResult::Aborted);
        assert_eq!(clock.now(), Duration::from_millis(15_666));
    }

    #[test]
    fn policy_depends_on_check_and_phase() {
        let failure = |check, live_lost| -> Result<(), EngineError> {
            Err(HandshakeFailure {
                check,
                lanes: LaneSet::single(1),
                live_lost,
                attempts: None,
            }
            .into())
        };
        let mut ctx = StepContext::new(LaneSet::ALL);
        assert!(ctx.record(failure(Check::PowerGood, true), Phase::BringUp).is_err());
        assert!(ctx.record(failure(Check::PowerGood, true), Phase::Measurement).is_ok());
        assert!(ctx.record(failure(Check::PllLock, true), Phase::Measurement).is_err());
        assert!(ctx.record(failure(Check::PllLock, false), Phase::Measurement).is_ok());
        assert!(ctx.record(failure(Check::ResetStable, false), Phase::BringUp).is_ok());
        assert!(ctx.record(failure(Check::ResetOver, true), Phase::Measurement).is_err());
        assert_eq!(ctx.failed(), LaneSet::single(1));
    }
}
