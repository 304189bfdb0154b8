//! Test helpers for running the engine without hardware.
//!
//! - [`sim::SimulatedCore`] behaves like the register interface of a test core
//! - [`clock::VirtualClock`] lets hours of test time pass instantly
//! - [`sink::MemorySink`] keeps measurements and iteration results for inspection
pub mod clock;
pub mod sim;
pub mod sink;

use std::sync::Arc;

use gt_engine::{
    kind::TransceiverKind,
    sequence::RawStep,
    testcase::{Environment, TestCase, TestParameters, new_test_case},
};

use crate::{clock::VirtualClock, sim::SimulatedCore, sink::MemorySink};

/// Everything needed to run one engine against a simulated core.
pub struct Bench {
    pub core: Arc<SimulatedCore>,
    pub clock: Arc<VirtualClock>,
    pub sink: MemorySink,
    pub env: Environment,
}

impl Bench {
    pub fn new(kind: TransceiverKind) -> Bench {
        init_logging();
        let clock = Arc::new(VirtualClock::default());
        let core = Arc::new(SimulatedCore::new(kind, clock.clone()));
        let env = Environment {
            clock: clock.clone(),
            ..Environment::default()
        };
        Bench {
            core,
            clock,
            sink: MemorySink::default(),
            env,
        }
    }

    pub fn test_case(&self, params: TestParameters) -> Box<dyn TestCase> {
        new_test_case(
            self.core.kind(),
            self.core.clone(),
            params,
            self.env.clone(),
            Box::new(self.sink.clone()),
        )
    }
}

/// Build a sequence from `(duration, mode)` pairs.
pub fn sequence(steps: &[(u32, &str)]) -> Vec<RawStep> {
    steps
        .iter()
        .map(|(duration, mode)| RawStep::new(*duration, *mode))
        .collect()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
