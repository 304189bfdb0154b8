//! GT_PRBS cores.
//!
//! These cores have plain 64-bit counters without a hardware second, so measurements are only
//! taken in `check_status`. The run time is the sum of all step durations since the last
//! `clear_status`.
use crate::{
    RegisterAccess,
    clock::{AbortFlag, Ticker},
    controller::{IterationController, Phase, ResultsMatrix, StepContext, StepDriver, TestResult},
    device::ComputeUnit,
    error::{EngineError, SetupError},
    handshake::{Handshake, Side},
    kind::TransceiverKind,
    monitor::Monitor,
    report::ReportSink,
    reset_lock::ResetDomain,
    resolver::TestCaseConfig,
    sequence::{Command, TestStep},
    testcase::{Environment, Station, TestCase, TestParameters},
};

pub struct GtPrbsTest<R> {
    station: Station<R>,
    monitor: Option<Monitor>,
}

impl<R: RegisterAccess> GtPrbsTest<R> {
    pub fn new(
        regs: R,
        params: TestParameters,
        env: Environment,
        sink: Box<dyn ReportSink>,
    ) -> GtPrbsTest<R> {
        GtPrbsTest {
            station: Station::new(TransceiverKind::GtPrbs, regs, params, env, sink),
            monitor: None,
        }
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }
}

struct GtPrbsDriver<'a, R> {
    cu: &'a ComputeUnit<R>,
    lane_config: &'a TestCaseConfig,
    monitor: &'a mut Monitor,
    handshake: Handshake,
    domain: &'a ResetDomain,
    ticker: &'a Ticker,
    /// Seconds since the counters were last cleared.
    run_duration: u32,
}

impl<R: RegisterAccess> GtPrbsDriver<'_, R> {
    fn reset_over(&mut self, ctx: &mut StepContext) -> Result<(), EngineError> {
        ctx.record(
            self.handshake.check_reset_over(
                self.cu,
                ctx.enabled(),
                Side::Both,
                self.domain,
                self.ticker,
            ),
            Phase::BringUp,
        )
    }
}

impl<R: RegisterAccess> StepDriver for GtPrbsDriver<'_, R> {
    fn begin(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError> {
        self.run_duration = self.run_duration.saturating_add(step.duration);
        match step.command {
            Command::ConfigureLink => {
                ctx.record(
                    self.handshake.check_power_good(self.cu, ctx.enabled(), false),
                    Phase::BringUp,
                )?;
                self.monitor.send_link_config(self.cu, self.lane_config)?;
                self.monitor
                    .enable_tx(self.cu, self.lane_config.global.disable_reference_prbs)?;
            }
            Command::TxRxReset => {
                ctx.record(
                    self.handshake.check_power_good(self.cu, ctx.enabled(), false),
                    Phase::BringUp,
                )?;
                self.handshake
                    .issue_full_reset(self.cu, self.domain, self.ticker)?;
            }
            Command::InsertError(lane) => self.monitor.insert_error(self.cu, lane)?,
            _ => {}
        }
        Ok(())
    }

    fn finish(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError> {
        match step.command {
            Command::ConfigureLink => {
                self.reset_over(ctx)?;
                self.monitor.enable_rx_check(self.cu)?;
            }
            Command::TxRxReset => self.reset_over(ctx)?,
            Command::ClearStatus => {
                self.monitor.clear_status(self.cu)?;
                self.run_duration = 0;
            }
            Command::CheckStatus => {
                let failing = self.monitor.check_split(self.cu, self.run_duration)?;
                ctx.fail_lanes(failing);
            }
            _ => {}
        }
        Ok(())
    }
}

impl<R: RegisterAccess + Send> TestCase for GtPrbsTest<R> {
    fn name(&self) -> String {
        self.station.name()
    }

    fn pre_setup(&mut self) -> Result<(), SetupError> {
        let config = self.station.env.config.clone();
        let prepared = self.station.pre_setup()?;
        self.monitor = Some(Monitor::new(
            TransceiverKind::GtPrbs.rate_profile(),
            &prepared.lane_config,
            &config,
        ));
        Ok(())
    }

    fn run(&mut self) -> TestResult {
        let ticker = self.station.ticker();
        let station = &mut self.station;
        let (Some(prepared), Some(monitor)) = (station.prepared.as_ref(), self.monitor.as_mut())
        else {
            log::error!("{}: run without successful setup", station.name());
            return TestResult::Failed;
        };

        let mut driver = GtPrbsDriver {
            cu: &station.cu,
            lane_config: &prepared.lane_config,
            monitor,
            handshake: Handshake::new(&station.env.config),
            domain: &station.domain,
            ticker: &ticker,
            run_duration: 0,
        };
        let controller = IterationController::new(
            station.cu.gt_index(),
            prepared.lane_config.available_lanes(),
            prepared.lane_config.enabled_lanes(),
            &ticker,
        );
        let (result, results) = controller.run(&prepared.steps, &mut driver, station.sink.as_mut());
        station.results = Some(results);
        result
    }

    fn post_teardown(&mut self) {
        if let Some(monitor) = &self.monitor {
            let cu = &self.station.cu;
            if let Err(e) = monitor
                .disable_rx_check(cu)
                .and_then(|()| monitor.disable_tx(cu))
            {
                log::error!("{}: teardown failed: {}", self.station.name(), e);
            }
        }
        self.station.report();
    }

    fn abort_flag(&self) -> &AbortFlag {
        &self.station.abort
    }

    fn results(&self) -> Option<&ResultsMatrix> {
        self.station.results.as_ref()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use gt_registers::map::GT_PRBS;

    use super::*;
    use crate::{
        clock::test::ManualClock, controller::IterationResult, device::test::RegisterFile,
        lane::LaneSet, report::NullSink, resolver::LaneOverrides, sequence::RawStep,
    };

    const CTRL: u16 = 0x20;
    /// Power good, PLL lock, TX and RX reset done.
    const HEALTHY: u32 = (1 << 1) | (1 << 2) | (1 << 3) | (1 << 6);
    /// 25.78125 Gbps of 64-bit words over one second.
    const WORDS_PER_SECOND: u64 = 402_832_031;

    fn set_counters(regs: &RegisterFile, lane: u8, tx_words: u64, rx_words: u64, errors: u64) {
        let tx = 0x28 + 2 * u16::from(lane);
        let rx = 0x30 + 4 * u16::from(lane);
        regs.set(tx, tx_words as u32);
        regs.set(tx + 1, (tx_words >> 32) as u32);
        regs.set(rx, rx_words as u32);
        regs.set(rx + 1, (rx_words >> 32) as u32);
        regs.set(rx + 2, errors as u32);
        regs.set(rx + 3, (errors >> 32) as u32);
    }

    fn test_case(params: TestParameters) -> (GtPrbsTest<Arc<RegisterFile>>, Arc<RegisterFile>) {
        let regs = Arc::new(RegisterFile::default());
        let env = Environment {
            clock: Arc::new(ManualClock::default()),
            ..Environment::default()
        };
        let test = GtPrbsTest::new(regs.clone(), params, env, Box::new(NullSink));
        (test, regs)
    }

    fn sequence(steps: &[(u32, &str)]) -> Vec<RawStep> {
        steps
            .iter()
            .map(|(duration, mode)| RawStep::new(*duration, *mode))
            .collect()
    }

    #[test]
    fn check_uses_time_since_clear() {
        let params = TestParameters::new(0).with_sequence(sequence(&[
            (1, "clear_status"),
            (10, "run"),
            (1, "check_status"),
        ]));
        let (mut test, regs) = test_case(params);
        regs.set(CTRL, HEALTHY);
        // eleven seconds since the clear at the end of the first step
        for lane in 0..4 {
            set_counters(&regs, lane, 11 * WORDS_PER_SECOND, 11 * WORDS_PER_SECOND, 0);
        }
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Passed);
        let rate = test.monitor().unwrap().lane_status(2).rate_gbps;
        assert!((rate - 25.781_25).abs() < 1e-3, "{}", rate);
    }

    #[test]
    fn error_percentage_fails_one_lane() {
        let params = TestParameters::new(0)
            .with_sequence(sequence(&[(1, "run"), (1, "check_status")]))
            .with_lane(
                3,
                LaneOverrides {
                    enable: Some(false),
                    ..LaneOverrides::default()
                },
            );
        let (mut test, regs) = test_case(params);
        // PRBS error flag of lane 1
        regs.set(CTRL, HEALTHY | (1 << 13));
        for lane in 0..4 {
            set_counters(&regs, lane, 1000, 1000, 0);
        }
        set_counters(&regs, 1, 1000, 1000, 51);

        assert_eq!(crate::testcase::execute(&mut test), TestResult::Failed);
        let results = test.results().unwrap();
        assert_eq!(
            results.column(1),
            vec![
                (0, IterationResult::Passed),
                (1, IterationResult::Failed),
                (2, IterationResult::Passed),
                (3, IterationResult::Disabled),
            ]
        );
    }

    #[test]
    fn power_loss_before_configuration_is_fatal() {
        let params = TestParameters::new(0).with_sequence(sequence(&[
            (1, "conf_25gbe"),
            (1, "tx_rx_rst"),
        ]));
        let (mut test, regs) = test_case(params);
        regs.set(CTRL, HEALTHY & !(1 << 1));
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Aborted);
        // nothing but the teardown reached the control register
        assert_eq!(regs.writes_to(CTRL).len(), 2);
        for addr in GT_PRBS.lane_config {
            assert!(regs.writes_to(addr).is_empty());
        }
        assert_eq!(
            test.results().unwrap().lane(0).unwrap(),
            &[IterationResult::Aborted, IterationResult::Aborted]
        );
    }

    #[test]
    fn reset_is_written_and_checked() {
        let params = TestParameters::new(0).with_sequence(sequence(&[(1, "tx_rx_rst")]));
        let (mut test, regs) = test_case(params);
        regs.set(CTRL, HEALTHY);
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Passed);
        let writes = regs.writes_to(CTRL);
        assert_eq!(writes[0], HEALTHY | 1);
        assert_eq!(
            test.results().unwrap().column(0).len(),
            LaneSet::ALL.len()
        );
    }
}
