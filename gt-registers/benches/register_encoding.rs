use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use gt_registers::{
    counters::{MULTI_GT_BURST_WORDS, RxBurst, RxLaneCounters, decode_rx_burst, encode_rx_burst},
    lane_config::{LaneConfigLayout, LaneWord},
};

fn lane_config(c: &mut Criterion) {
    let lane = LaneWord {
        loopback: 2,
        rx_lpm: true,
        rx_polarity: false,
        tx_polarity: true,
        tx_post_emph: 7,
        tx_main_cursor: 80,
        tx_pre_emph: 3,
        tx_diffctrl: 24,
    };
    let packed = LaneConfigLayout::MULTI_GT.pack(&lane);

    c.bench_function("pack lane config", |b| {
        b.iter(|| LaneConfigLayout::MULTI_GT.pack(black_box(&lane)))
    });
    c.bench_function("unpack lane config", |b| {
        b.iter(|| LaneConfigLayout::MULTI_GT.unpack(black_box(packed)))
    });
}

fn rx_burst(c: &mut Criterion) {
    let counters = RxLaneCounters {
        word_count: 322_265_625,
        error_count: 12,
    };
    let words: [u32; MULTI_GT_BURST_WORDS] = encode_rx_burst(&RxBurst {
        lanes: [counters; 4],
        toggle: true,
        timestamp: 3600,
    });

    c.bench_function("decode rx burst", |b| {
        b.iter(|| decode_rx_burst(black_box(&words)))
    });
}

criterion_group!(benches, lane_config, rx_burst);
criterion_main!(benches);
