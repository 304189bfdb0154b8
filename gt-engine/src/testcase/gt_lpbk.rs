//! GT_LPBK cores. They only take a lane configuration and a reset, there is nothing to measure.
use crate::{
    RegisterAccess,
    clock::{AbortFlag, Ticker},
    controller::{IterationController, ResultsMatrix, StepContext, StepDriver, TestResult},
    device::ComputeUnit,
    error::{EngineError, SetupError},
    handshake::Handshake,
    kind::TransceiverKind,
    monitor::Monitor,
    report::ReportSink,
    reset_lock::ResetDomain,
    resolver::TestCaseConfig,
    sequence::{Command, TestStep},
    testcase::{Environment, Station, TestCase, TestParameters},
};

pub struct GtLpbkTest<R> {
    station: Station<R>,
}

impl<R: RegisterAccess> GtLpbkTest<R> {
    pub fn new(
        regs: R,
        params: TestParameters,
        env: Environment,
        sink: Box<dyn ReportSink>,
    ) -> GtLpbkTest<R> {
        GtLpbkTest {
            station: Station::new(TransceiverKind::GtLpbk, regs, params, env, sink),
        }
    }
}

struct GtLpbkDriver<'a, R> {
    cu: &'a ComputeUnit<R>,
    lane_config: &'a TestCaseConfig,
    monitor: Monitor,
    handshake: Handshake,
    domain: &'a ResetDomain,
    ticker: &'a Ticker,
}

impl<R: RegisterAccess> StepDriver for GtLpbkDriver<'_, R> {
    fn begin(&mut self, step: &TestStep, _ctx: &mut StepContext) -> Result<(), EngineError> {
        match step.command {
            Command::ConfigureLink => {
                self.monitor.send_link_config(self.cu, self.lane_config)?;
                self.handshake
                    .issue_full_reset(self.cu, self.domain, self.ticker)
            }
            Command::TxRxReset => self
                .handshake
                .issue_full_reset(self.cu, self.domain, self.ticker),
            _ => Ok(()),
        }
    }

    fn finish(&mut self, _step: &TestStep, _ctx: &mut StepContext) -> Result<(), EngineError> {
        Ok(())
    }
}

impl<R: RegisterAccess + Send> TestCase for GtLpbkTest<R> {
    fn name(&self) -> String {
        self.station.name()
    }

    fn pre_setup(&mut self) -> Result<(), SetupError> {
        self.station.pre_setup().map(|_| ())
    }

    fn run(&mut self) -> TestResult {
        let ticker = self.station.ticker();
        let station = &mut self.station;
        let Some(prepared) = station.prepared.as_ref() else {
            log::error!("{}: run without successful setup", station.name());
            return TestResult::Failed;
        };

        let mut driver = GtLpbkDriver {
            cu: &station.cu,
            lane_config: &prepared.lane_config,
            monitor: Monitor::new(
                station.kind.rate_profile(),
                &prepared.lane_config,
                &station.env.config,
            ),
            handshake: Handshake::new(&station.env.config),
            domain: &station.domain,
            ticker: &ticker,
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
        self.station.report();
    }

    fn abort_flag(&self) -> &AbortFlag {
        &self.station.abort
    }

    fn results(&self) -> Option<&ResultsMatrix> {
        self.station.results.as_ref()
    }
}
