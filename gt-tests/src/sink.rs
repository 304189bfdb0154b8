use std::sync::{Arc, Mutex};

use gt_engine::{
    controller::IterationResult,
    report::{MeasurementRecord, ReportSink},
};

/// Report sink whose clones share the collected data.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<MeasurementRecord>>>,
    iterations: Arc<Mutex<Vec<(usize, Vec<(u8, IterationResult)>)>>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<MeasurementRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn iterations(&self) -> Vec<(usize, Vec<(u8, IterationResult)>)> {
        self.iterations.lock().unwrap().clone()
    }
}

impl ReportSink for MemorySink {
    fn measurement(&mut self, record: &MeasurementRecord) {
        self.records.lock().unwrap().push(record.clone());
    }

    fn iteration_done(&mut self, iteration: usize, results: &[(u8, IterationResult)]) {
        self.iterations
            .lock()
            .unwrap()
            .push((iteration, results.to_vec()));
    }
}
