use gt_engine::{
    controller::{IterationResult, TestResult},
    kind::TransceiverKind,
    resolver::LaneOverrides,
    testcase::{TestParameters, execute},
};
use gt_registers::map::GT_LPBK;
use gt_tests::{Bench, sequence};

#[test]
fn configuration_and_resets() {
    let bench = Bench::new(TransceiverKind::GtLpbk);
    let params = TestParameters::new(1).with_global(LaneOverrides {
        tx_diffctrl: Some(12),
        rx_use_lpm: Some(true),
        ..LaneOverrides::default()
    });
    let mut test = bench.test_case(params);

    assert_eq!(execute(test.as_mut()), TestResult::Passed);
    // one reset in the configuration step and one in tx_rx_rst
    assert_eq!(bench.core.resets(), 2);
    for lane in 0..4 {
        let word = GT_LPBK.lane_layout.unpack(bench.core.lane_config(lane));
        assert_eq!(word.tx_diffctrl, 12);
        assert!(word.rx_lpm);
    }
    assert_eq!(
        test.results().unwrap().lane(0).unwrap(),
        &[IterationResult::Passed; 3]
    );
    assert!(bench.sink.records().is_empty());
}

#[test]
fn error_injection_is_not_available() {
    let bench = Bench::new(TransceiverKind::GtLpbk);
    let params = TestParameters::new(0)
        .with_sequence(sequence(&[(1, "conf_25gbe_no_fec"), (1, "insert_error_lane_0")]));
    let mut test = bench.test_case(params);

    assert_eq!(execute(test.as_mut()), TestResult::Failed);
    assert_eq!(bench.core.writes(), 0);
}
