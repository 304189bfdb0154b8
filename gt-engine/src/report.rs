//! Measurement records and where they go.
use std::{fmt::Display, io::Write};

use crate::{controller::IterationResult, lane::LaneSet, monitor::LaneRuntimeStatus};

const LANE_COLUMNS: [&str; 7] = [
    "Test result",
    "Link Speed (Gbps)",
    "Bit Cnt",
    "Bit Error Cnt",
    "Acc Bit Cnt",
    "Acc Bit Error Cnt",
    "BER",
];

/// One sample of all enabled lanes, taken during a run step.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub global_time_seconds: u64,
    pub lanes: Vec<(u8, LaneRuntimeStatus)>,
}

impl MeasurementRecord {
    pub fn lane_set(&self) -> LaneSet {
        self.lanes.iter().map(|(lane, _)| *lane).collect()
    }

    /// Column names matching [`MeasurementRecord::csv_row`] for the given lanes.
    pub fn csv_header(lanes: LaneSet) -> String {
        let mut columns = vec!["Global time (s)".to_string()];
        for lane in lanes.iter() {
            columns.extend(
                LANE_COLUMNS
                    .iter()
                    .map(|column| format!("Rx[{}] {}", lane, column)),
            );
        }
        columns.join(",")
    }

    pub fn csv_row(&self) -> String {
        self.to_string()
    }
}

impl Display for MeasurementRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.global_time_seconds)?;
        for (_, status) in &self.lanes {
            write!(
                f,
                ",{},{:.6},{:.0},{:.0},{:.2e},{:.2e},{:.3e}",
                status.result,
                status.rate_gbps,
                status.bit_count,
                status.bit_error_count,
                status.accumulated_bit_count,
                status.accumulated_bit_error_count,
                status.ber
            )?;
        }
        Ok(())
    }
}

/// Receiver of measurements and iteration results.
pub trait ReportSink: Send {
    fn measurement(&mut self, record: &MeasurementRecord);

    /// Called once per step with the result of every available lane.
    fn iteration_done(&mut self, _iteration: usize, _results: &[(u8, IterationResult)]) {}
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl ReportSink for NullSink {
    fn measurement(&mut self, _record: &MeasurementRecord) {}
}

impl ReportSink for Vec<MeasurementRecord> {
    fn measurement(&mut self, record: &MeasurementRecord) {
        self.push(record.clone());
    }
}

/// Writes measurements as CSV. The header is written with the first record.
pub struct CsvSink<W> {
    writer: W,
    header_written: bool,
}

impl<W: Write + Send> CsvSink<W> {
    pub fn new(writer: W) -> CsvSink<W> {
        CsvSink {
            writer,
            header_written: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_record(&mut self, record: &MeasurementRecord) -> std::io::Result<()> {
        if !self.header_written {
            writeln!(
                self.writer,
                "{}",
                MeasurementRecord::csv_header(record.lane_set())
            )?;
            self.header_written = true;
        }
        writeln!(self.writer, "{}", record)?;
        self.writer.flush()
    }
}

impl<W: Write + Send> ReportSink for CsvSink<W> {
    fn measurement(&mut self, record: &MeasurementRecord) {
        // A broken output file must not fail the measurement itself
        if let Err(e) = self.write_record(record) {
            log::error!("Failed to write measurement: {}", e);
        }
    }
}
