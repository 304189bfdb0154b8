use std::time::Duration;

use gt_engine::{
    controller::{IterationResult, TestResult},
    kind::TransceiverKind,
    lane::LaneSet,
    monitor::LaneResult,
    report::MeasurementRecord,
    resolver::{ErrorThreshold, LaneOverrides},
    testcase::{TestCase, TestParameters, execute},
};
use gt_tests::{Bench, sequence, sim::LaneBehaviour};

use IterationResult::{Aborted, Disabled, Failed, Passed};

/// conf, reset, clear, 10 s run, check.
fn short_sequence() -> TestParameters {
    TestParameters::new(0).with_sequence(sequence(&[
        (1, "conf_gt"),
        (1, "tx_rx_rst"),
        (1, "clear_status"),
        (10, "run"),
        (1, "check_status"),
    ]))
}

fn lane_results(test: &dyn TestCase, lane: u8) -> Vec<IterationResult> {
    test.results()
        .and_then(|results| results.lane(lane))
        .map(<[IterationResult]>::to_vec)
        .unwrap_or_default()
}

#[test]
fn healthy_link_passes() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    for lane in 0..4 {
        assert_eq!(lane_results(test.as_ref(), lane), vec![Passed; 5]);
    }

    let records = bench.sink.records();
    assert!(records.len() >= 9, "{} samples", records.len());
    let last = records.last().unwrap();
    assert_eq!(last.lane_set(), LaneSet::ALL);
    for (_, status) in &last.lanes {
        assert_eq!(status.result, LaneResult::Pass);
        assert_eq!(status.ber, 0.0);
        assert!((status.rate_gbps - 56.42).abs() < 1e-6);
    }
    // one full reset during bring-up
    assert_eq!(bench.core.resets(), 1);
    // TX and RX are switched off again
    assert_eq!(bench.core.ctrl() & 0x30, 0);
    assert_eq!(bench.sink.iterations().len(), 5);
}

#[test]
fn default_sequence_runs_for_a_minute() {
    let bench = Bench::new(TransceiverKind::Gtyp);
    let mut test = bench.test_case(TestParameters::new(0));

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    assert!(bench.sink.records().len() >= 58);
}

#[test]
fn ber_above_threshold_fails_only_that_lane() {
    let bench = Bench::new(TransceiverKind::Gtf);
    bench.core.set_lane(
        2,
        LaneBehaviour {
            errors_per_second: 1000,
            ..bench.core.lane(2)
        },
    );
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Failed);
    assert_eq!(
        lane_results(test.as_ref(), 2),
        vec![Passed, Passed, Passed, Failed, Failed]
    );
    for lane in [0, 1, 3] {
        assert_eq!(lane_results(test.as_ref(), lane), vec![Passed; 5]);
    }
}

#[test]
fn ber_equal_to_threshold_passes() {
    // 10.3125 Gbps and 33 errors per second is a BER of exactly 3.2e-9
    let threshold = |errors_per_second| {
        let bench = Bench::new(TransceiverKind::Gtf);
        for lane in 0..4 {
            bench.core.set_lane(
                lane,
                LaneBehaviour {
                    errors_per_second,
                    ..bench.core.lane(lane)
                },
            );
        }
        let params = short_sequence().with_global(LaneOverrides {
            error_threshold: Some(ErrorThreshold::Ber(3.2e-9)),
            ..LaneOverrides::default()
        });
        let mut test = bench.test_case(params);
        execute(test.as_mut())
    };

    assert_eq!(threshold(33), TestResult::Passed);
    assert_eq!(threshold(34), TestResult::Failed);
}

#[test]
fn injected_error_is_counted() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let params = TestParameters::new(0).with_sequence(sequence(&[
        (1, "conf_gt"),
        (1, "tx_rx_rst"),
        (1, "clear_status"),
        (5, "run"),
        (1, "insert_error_lane_1"),
        (5, "run"),
        (1, "check_status"),
    ]));
    let mut test = bench.test_case(params);

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    let records = bench.sink.records();
    let errors = |record: &MeasurementRecord, lane: u8| {
        record
            .lanes
            .iter()
            .find(|(l, _)| *l == lane)
            .map(|(_, status)| status.bit_error_count)
            .unwrap()
    };
    assert_eq!(records.iter().filter(|r| errors(r, 1) == 1.0).count(), 1);
    assert!(records.iter().all(|r| errors(r, 0) == 0.0));
    let last = records.last().unwrap();
    assert_eq!(last.lanes[1].1.accumulated_bit_error_count, 1.0);
    assert!(last.lanes[1].1.ber > 0.0);
}

#[test]
fn disabled_lane_is_left_alone() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let params = short_sequence()
        .with_global(LaneOverrides {
            tx_diffctrl: Some(12),
            ..LaneOverrides::default()
        })
        .with_lane(
            2,
            LaneOverrides {
                enable: Some(false),
                ..LaneOverrides::default()
            },
        );
    let mut test = bench.test_case(params);

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    assert_eq!(bench.core.lane_config(2), 0);
    assert_eq!(bench.core.lane_config(3), 12);
    assert_eq!(lane_results(test.as_ref(), 2), vec![Disabled; 5]);
    assert_eq!(lane_results(test.as_ref(), 3), vec![Passed; 5]);

    let records = bench.sink.records();
    assert_eq!(records[0].lane_set(), LaneSet::from_bits(0b1011));
    let header = MeasurementRecord::csv_header(records[0].lane_set());
    assert!(!header.contains("Rx[2]"));
    assert!(header.contains("Rx[3]"));
}

#[test]
fn single_lane_core() {
    let bench = Bench::new(TransceiverKind::Gtyp);
    let mut test = bench.test_case(short_sequence().with_reported_lanes(1));

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    assert_eq!(lane_results(test.as_ref(), 0), vec![Passed; 5]);
    assert!(test.results().unwrap().lane(1).is_none());
    assert_eq!(bench.core.lane_config(1), 0);
}

#[test]
fn abort_marks_remaining_iterations() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let params = short_sequence().with_lane(
        0,
        LaneOverrides {
            enable: Some(false),
            ..LaneOverrides::default()
        },
    );
    let mut test = bench.test_case(params);
    // in the middle of the run
    bench
        .clock
        .abort_at(Duration::from_secs(10), test.abort_flag().clone());

    assert_eq!(execute(test.as_mut()), TestResult::Aborted);
    assert_eq!(
        lane_results(test.as_ref(), 1),
        vec![Passed, Passed, Passed, Aborted, Aborted]
    );
    assert_eq!(lane_results(test.as_ref(), 0), vec![Disabled; 5]);
    // teardown still ran
    assert_eq!(bench.core.ctrl() & 0x30, 0);
}

#[test]
fn reset_watchdog_gives_up() {
    let bench = Bench::new(TransceiverKind::Gtm);
    bench.core.set_reset_stuck(true);
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Aborted);
    // first request plus one per failed poll but the last
    assert_eq!(bench.core.resets(), 5);
    assert_eq!(
        lane_results(test.as_ref(), 0),
        vec![Passed, Aborted, Aborted, Aborted, Aborted]
    );
    assert!(bench.sink.records().is_empty());
}

#[test]
fn power_loss_of_one_gtf_lane_is_attributed() {
    let bench = Bench::new(TransceiverKind::Gtf);
    let core = bench.core.clone();
    bench
        .clock
        .schedule(Duration::from_secs(10), move || core.set_lane_power_good(1, false));
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Failed);
    assert_eq!(
        lane_results(test.as_ref(), 1),
        vec![Passed, Passed, Passed, Passed, Failed]
    );
    assert_eq!(lane_results(test.as_ref(), 0), vec![Passed; 5]);
}

#[test]
fn power_loss_before_bring_up_aborts() {
    let bench = Bench::new(TransceiverKind::Gtf);
    bench.core.set_lane_power_good(3, false);
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Aborted);
    assert_eq!(
        lane_results(test.as_ref(), 3),
        vec![Passed, Aborted, Aborted, Aborted, Aborted]
    );
    assert_eq!(bench.core.resets(), 0);
}

#[test]
fn pll_loss_during_measurement_is_fatal() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let core = bench.core.clone();
    bench
        .clock
        .schedule(Duration::from_secs(12), move || core.set_pll_lock(false));
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Aborted);
    assert_eq!(
        lane_results(test.as_ref(), 0),
        vec![Passed, Passed, Passed, Passed, Aborted]
    );
}

#[test]
fn reset_done_glitch_fails_the_check() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let core = bench.core.clone();
    bench
        .clock
        .schedule(Duration::from_secs(12), move || core.glitch_tx_reset_done());
    let mut test = bench.test_case(short_sequence());

    assert_eq!(execute(test.as_mut()), TestResult::Failed);
    for lane in 0..4 {
        assert_eq!(
            lane_results(test.as_ref(), lane),
            vec![Passed, Passed, Passed, Passed, Failed]
        );
    }
}

#[test]
fn invalid_sequence_touches_no_register() {
    let bench = Bench::new(TransceiverKind::Gtm);
    let params = TestParameters::new(0).with_sequence(sequence(&[(1, "conf_gt"), (0, "run")]));
    let mut test = bench.test_case(params);

    assert_eq!(execute(test.as_mut()), TestResult::Failed);
    assert_eq!(bench.core.writes(), 0);
    assert!(test.results().is_none());
}
