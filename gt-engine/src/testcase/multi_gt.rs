//! Multi-GT PRBS cores (GTF, GTM, GTYP).
use crate::{
    RegisterAccess,
    clock::{AbortFlag, Ticker},
    config::Config,
    controller::{IterationController, Phase, ResultsMatrix, StepContext, StepDriver, TestResult},
    device::ComputeUnit,
    error::{EngineError, SetupError},
    handshake::{Handshake, ResetTarget, Side},
    kind::TransceiverKind,
    monitor::Monitor,
    report::{MeasurementRecord, ReportSink},
    reset_lock::ResetDomain,
    resolver::TestCaseConfig,
    sequence::{Command, TestStep},
    testcase::{Environment, Station, TestCase, TestParameters},
};

pub struct MultiGtTest<R> {
    station: Station<R>,
    monitor: Option<Monitor>,
}

impl<R: RegisterAccess> MultiGtTest<R> {
    pub fn new(
        kind: TransceiverKind,
        regs: R,
        params: TestParameters,
        env: Environment,
        sink: Box<dyn ReportSink>,
    ) -> MultiGtTest<R> {
        MultiGtTest {
            station: Station::new(kind, regs, params, env, sink),
            monitor: None,
        }
    }

    pub fn monitor(&self) -> Option<&Monitor> {
        self.monitor.as_ref()
    }

    fn teardown(&self) -> Result<(), EngineError> {
        if let Some(monitor) = &self.monitor {
            monitor.disable_rx_check(&self.station.cu)?;
            monitor.disable_tx(&self.station.cu)?;
        }
        Ok(())
    }
}

struct MultiGtDriver<'a, R> {
    cu: &'a ComputeUnit<R>,
    lane_config: &'a TestCaseConfig,
    monitor: &'a mut Monitor,
    handshake: Handshake,
    domain: &'a ResetDomain,
    ticker: &'a Ticker,
    config: &'a Config,
}

impl<R: RegisterAccess> MultiGtDriver<'_, R> {
    fn settle(&self, ticks: u32) -> Result<(), EngineError> {
        if self.ticker.wait_ticks(ticks) {
            Ok(())
        } else {
            Err(EngineError::Aborted)
        }
    }

    fn full_reset(&mut self, ctx: &mut StepContext) -> Result<(), EngineError> {
        let enabled = ctx.enabled();
        ctx.record(
            self.handshake.check_power_good(self.cu, enabled, false),
            Phase::BringUp,
        )?;
        self.monitor.clear_status(self.cu)?;
        self.handshake
            .issue_full_reset(self.cu, self.domain, self.ticker)?;
        self.settle(self.config.tx_settle_ticks)?;
        ctx.record(
            self.handshake.check_pll_lock(self.cu, enabled, false),
            Phase::BringUp,
        )?;
        self.handshake.check_reset_request(self.cu, Side::Both)?;
        ctx.record(
            self.handshake
                .check_reset_over(self.cu, enabled, Side::Both, self.domain, self.ticker),
            Phase::BringUp,
        )?;
        self.monitor.clear_status(self.cu)
    }

    fn targeted_reset(
        &mut self,
        target: ResetTarget,
        ctx: &mut StepContext,
    ) -> Result<(), EngineError> {
        ctx.record(
            self.handshake.check_power_good(self.cu, ctx.enabled(), true),
            Phase::BringUp,
        )?;
        self.monitor.clear_status(self.cu)?;
        self.handshake
            .issue_reset(self.cu, target, self.domain, self.ticker)?;
        let side = target.side();
        self.settle(match side {
            Side::Rx => self.config.rx_settle_ticks,
            _ => self.config.tx_settle_ticks,
        })?;
        self.handshake.check_reset_request(self.cu, side)?;
        self.monitor.clear_status(self.cu)
    }

    fn check_link(&mut self, ctx: &mut StepContext) -> Result<(), EngineError> {
        let enabled = ctx.enabled();
        for side in [Side::Tx, Side::Rx] {
            ctx.record(
                self.handshake.check_reset_stable(self.cu, enabled, side),
                Phase::Measurement,
            )?;
        }
        ctx.record(
            self.handshake.check_pll_lock(self.cu, enabled, true),
            Phase::Measurement,
        )
    }
}

impl<R: RegisterAccess> StepDriver for MultiGtDriver<'_, R> {
    fn begin(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError> {
        match step.command {
            Command::ConfigureLink => {
                self.monitor.clear_status(self.cu)?;
                self.monitor.send_link_config(self.cu, self.lane_config)?;
                self.monitor
                    .enable_tx(self.cu, self.lane_config.global.disable_reference_prbs)?;
            }
            Command::TxRxReset => self.full_reset(ctx)?,
            Command::TxReset => self.targeted_reset(ResetTarget::Tx, ctx)?,
            Command::RxReset => self.targeted_reset(ResetTarget::Rx, ctx)?,
            Command::TxDatapathReset => self.targeted_reset(ResetTarget::TxDatapath, ctx)?,
            Command::RxDatapathReset => self.targeted_reset(ResetTarget::RxDatapath, ctx)?,
            Command::InsertError(lane) => self.monitor.insert_error(self.cu, lane)?,
            Command::Run | Command::ClearStatus | Command::CheckStatus => {}
        }
        Ok(())
    }

    fn finish(&mut self, step: &TestStep, ctx: &mut StepContext) -> Result<(), EngineError> {
        match step.command {
            Command::ConfigureLink => self.monitor.enable_rx_check(self.cu)?,
            command if command.is_reset() => self.check_link(ctx)?,
            Command::ClearStatus => self.monitor.clear_status(self.cu)?,
            Command::CheckStatus => {
                self.monitor.latch_status(self.cu)?;
                ctx.record(
                    self.handshake
                        .check_power_good(self.cu, ctx.enabled(), false),
                    Phase::Measurement,
                )?;
                self.check_link(ctx)?;
                let failing = self.monitor.check_burst(self.cu)?;
                ctx.fail_lanes(failing);
            }
            _ => {}
        }
        Ok(())
    }

    fn samples_hw_tick(&self) -> bool {
        true
    }

    fn start_sampling(&mut self) -> Result<(), EngineError> {
        self.monitor.sync_hw_tick(self.cu)
    }

    fn wait_for_hw_tick(&mut self, ticker: &Ticker) -> Result<bool, EngineError> {
        self.monitor.wait_for_hw_tick(self.cu, ticker)
    }

    fn sample(&mut self, global_time_seconds: u64) -> Result<Option<MeasurementRecord>, EngineError> {
        self.monitor
            .sample_burst(self.cu, global_time_seconds)
            .map(Some)
    }
}

impl<R: RegisterAccess + Send> TestCase for MultiGtTest<R> {
    fn name(&self) -> String {
        self.station.name()
    }

    fn pre_setup(&mut self) -> Result<(), SetupError> {
        let kind = self.station.kind;
        let config = self.station.env.config.clone();
        let prepared = self.station.pre_setup()?;
        self.monitor = Some(Monitor::new(
            kind.rate_profile(),
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

        let mut driver = MultiGtDriver {
            cu: &station.cu,
            lane_config: &prepared.lane_config,
            monitor,
            handshake: Handshake::new(&station.env.config),
            domain: &station.domain,
            ticker: &ticker,
            config: &station.env.config,
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
        if let Err(e) = self.teardown() {
            log::error!("{}: teardown failed: {}", self.name(), e);
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
    use std::{sync::Arc, time::Duration};

    use gt_registers::map::MULTI_GT;

    use super::*;
    use crate::{
        clock::{Clock, test::ManualClock},
        controller::IterationResult,
        device::test::RegisterFile,
        report::NullSink,
        sequence::RawStep,
    };

    const CTRL: u16 = 0x40;
    const STATUS: u16 = 0x5D;
    /// Power good, PLL lock and both reset done bits live, no edges.
    const HEALTHY: u32 = 0x1111;

    fn test_case(
        sequence: &[(u32, &str)],
        status: u32,
    ) -> (MultiGtTest<Arc<RegisterFile>>, Arc<RegisterFile>, Arc<ManualClock>) {
        let regs = Arc::new(RegisterFile::default());
        regs.set(STATUS, status);
        let clock = Arc::new(ManualClock::default());
        let env = Environment {
            clock: clock.clone(),
            ..Environment::default()
        };
        let params = TestParameters::new(2).with_sequence(
            sequence
                .iter()
                .map(|(duration, mode)| RawStep::new(*duration, *mode))
                .collect(),
        );
        let test = MultiGtTest::new(TransceiverKind::Gtm, regs.clone(), params, env, Box::new(NullSink));
        (test, regs, clock)
    }

    #[test]
    fn configure_and_reset() {
        let (mut test, regs, clock) = test_case(&[(1, "conf_gt"), (1, "tx_rx_rst")], HEALTHY);
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Passed);

        let control = MULTI_GT.control.unwrap();
        let writes = regs.writes_to(CTRL);
        // clear, enable TX, enable RX, clear, reset, clear, then teardown
        assert_eq!(writes[0], control.clear_status);
        assert_eq!(writes[1] & control.tx_enable, control.tx_enable);
        assert_ne!(writes[2] & control.rx_enable, 0);
        assert!(writes.iter().any(|w| w & control.full_reset != 0));
        assert_eq!(regs.get(CTRL) & (control.tx_enable | control.rx_enable), 0);
        // four lane words
        for addr in MULTI_GT.lane_config {
            assert_eq!(regs.writes_to(addr).len(), 1);
        }
        // two step ticks, one reset tick, two settle ticks
        assert_eq!(clock.now(), Duration::from_secs(5));
    }

    #[test]
    fn pll_loss_during_reset_is_fatal() {
        let (mut test, _, _) = test_case(
            &[(1, "tx_rx_rst"), (1, "clear_status"), (1, "check_status")],
            HEALTHY & !(1 << 4),
        );
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Aborted);
        let results = test.results().unwrap();
        assert_eq!(
            results.lane(0).unwrap(),
            &[IterationResult::Aborted; 3]
        );
    }

    #[test]
    fn unstable_reset_done_fails_the_step() {
        // falling edge of TX reset done
        let (mut test, _, _) = test_case(&[(1, "tx_rst")], HEALTHY | (1 << 9));
        assert_eq!(crate::testcase::execute(&mut test), TestResult::Failed);
        assert_eq!(
            test.results().unwrap().column(0),
            vec![
                (0, IterationResult::Failed),
                (1, IterationResult::Failed),
                (2, IterationResult::Failed),
                (3, IterationResult::Failed),
            ]
        );
    }

    #[test]
    fn run_without_setup_fails() {
        let (mut test, regs, _) = test_case(&[(1, "run")], HEALTHY);
        assert_eq!(test.run(), TestResult::Failed);
        assert!(regs.writes.lock().unwrap().is_empty());
    }
}
