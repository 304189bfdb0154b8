//! # GT PRBS Test Runner
//!
//! Runs the GT test engine on Linux against compute units mapped through UIO or a PCIe BAR.
//!
//! ## Overview
//!
//! One engine is started per GT index given on the command line, each on its own blocking
//! worker. Measurements of every GT are written to `<output>/<prefix>_gt_<index>.csv`.
//! Ctrl-C aborts all engines; they finish their teardown before the process exits.
pub mod backends;

use std::{
    collections::BTreeMap,
    error::Error,
    fs::File,
    io::BufWriter,
    path::PathBuf,
    sync::Arc,
};

use clap::{Parser, ValueEnum};
use clap_num::maybe_hex;
use env_logger::Env;
use gt_engine::{
    config::Builder,
    controller::TestResult,
    kind::{ThresholdKind, TransceiverKind},
    report::CsvSink,
    resolver::{ErrorThreshold, GtSettingsSource, LaneOverrides, LoopbackMode, Polarity},
    sequence::RawStep,
    testcase::{Environment, TestCase, TestParameters, execute, new_test_case},
};

use crate::backends::{CuWindow, MappedRegion};

const DEFAULT_UIO_NAME: &str = "gt_prbs";

#[derive(Parser, Eq, PartialEq, Clone)]
enum DeviceImpl {
    Uio {
        path: Option<PathBuf>,
        #[arg(
            short,
            long,
            help = "UIO name to look for if no path is given",
            default_value = DEFAULT_UIO_NAME
        )]
        name: String,
    },
    Pci {
        #[arg(help = "PCIe function as dddd:bb:dd.f")]
        device: String,
        #[arg(short, long, default_value = "0")]
        bar: u8,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LoopbackArg {
    Disable,
    NearEndPcs,
    NearEndPma,
    FarEndPcs,
    FarEndPma,
}

impl From<LoopbackArg> for LoopbackMode {
    fn from(value: LoopbackArg) -> Self {
        match value {
            LoopbackArg::Disable => LoopbackMode::Disable,
            LoopbackArg::NearEndPcs => LoopbackMode::NearEndPcs,
            LoopbackArg::NearEndPma => LoopbackMode::NearEndPma,
            LoopbackArg::FarEndPcs => LoopbackMode::FarEndPcs,
            LoopbackArg::FarEndPma => LoopbackMode::FarEndPma,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SettingsArg {
    Cable,
    Module,
}

#[derive(Parser)]
#[command(about = "PRBS test of FPGA GT transceiver lanes", long_about = None)]
struct Args {
    #[arg(short, long, help = "Test core: gt_prbs, gt_lpbk, gtf, gtm or gtyp")]
    kind: TransceiverKind,

    #[arg(short, long, value_delimiter = ',', default_value = "0")]
    gt: Vec<u32>,

    #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0", help = "Byte offset of the first compute unit")]
    cu_offset: usize,

    #[arg(long, value_parser = maybe_hex::<usize>, default_value = "0x1000", help = "Byte distance between compute units of consecutive GTs")]
    cu_stride: usize,

    #[arg(
        short,
        long = "step",
        value_parser = parse_step,
        help = "Test step as <duration>:<mode>, repeat for a sequence"
    )]
    steps: Vec<RawStep>,

    #[arg(long, value_delimiter = ',')]
    disable_lane: Vec<u8>,

    #[arg(long, help = "Lane count reported by the core", default_value = "4")]
    lanes: u8,

    #[arg(long)]
    gt_settings: Option<SettingsArg>,

    #[arg(long)]
    loopback: Option<LoopbackArg>,

    #[arg(long, help = "Percent for GT_PRBS, BER for Multi-GT cores")]
    error_threshold: Option<f64>,

    #[arg(long)]
    tx_diffctrl: Option<u32>,

    #[arg(long)]
    tx_main_cursor: Option<u32>,

    #[arg(long)]
    tx_pre_emph: Option<u32>,

    #[arg(long)]
    tx_post_emph: Option<u32>,

    #[arg(long)]
    rx_lpm: bool,

    #[arg(long)]
    tx_polarity_inverted: bool,

    #[arg(long)]
    rx_polarity_inverted: bool,

    #[arg(long)]
    disable_reference_prbs: bool,

    #[arg(long, default_value = "5", help = "Reset-over polls before a reset is given up")]
    watchdog_max: u32,

    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    #[clap(subcommand)]
    device: Option<DeviceImpl>,
}

fn parse_step(s: &str) -> Result<RawStep, String> {
    let (duration, mode) = s
        .split_once(':')
        .ok_or_else(|| format!("expected <duration>:<mode>, got '{}'", s))?;
    let duration = duration
        .trim()
        .parse()
        .map_err(|e| format!("invalid duration '{}': {}", duration, e))?;
    Ok(RawStep::new(duration, mode.trim()))
}

fn threshold(kind: TransceiverKind, value: f64) -> Result<ErrorThreshold, String> {
    match kind.threshold_kind() {
        ThresholdKind::Ber => Ok(ErrorThreshold::Ber(value)),
        ThresholdKind::Percent if value >= 0.0 && value.fract() == 0.0 => {
            Ok(ErrorThreshold::Percent(value as u32))
        }
        ThresholdKind::Percent => Err(format!(
            "{} expects a whole percentage as error threshold, got {}",
            kind, value
        )),
    }
}

fn global_overrides(args: &Args) -> Result<LaneOverrides, String> {
    let inverted = |set: bool| set.then_some(Polarity::Inverted);
    Ok(LaneOverrides {
        gt_settings: args.gt_settings.map(|settings| match settings {
            SettingsArg::Cable => GtSettingsSource::Cable,
            SettingsArg::Module => GtSettingsSource::Module,
        }),
        loopback_mode: args.loopback.map(LoopbackMode::from),
        disable_reference_prbs: args.disable_reference_prbs.then_some(true),
        error_threshold: args
            .error_threshold
            .map(|value| threshold(args.kind, value))
            .transpose()?,
        tx_diffctrl: args.tx_diffctrl,
        tx_main_cursor: args.tx_main_cursor,
        tx_pre_emph: args.tx_pre_emph,
        tx_post_emph: args.tx_post_emph,
        rx_use_lpm: args.rx_lpm.then_some(true),
        tx_polarity: inverted(args.tx_polarity_inverted),
        rx_polarity: inverted(args.rx_polarity_inverted),
        enable: None,
    })
}

fn open_device(device: Option<DeviceImpl>) -> Result<MappedRegion, Box<dyn Error>> {
    let device = device.or_else(|| {
        let path = backends::uio::find_device(DEFAULT_UIO_NAME)?;
        log::info!("Auto-detected UIO device at {}", path.display());
        Some(DeviceImpl::Uio {
            path: Some(path),
            name: DEFAULT_UIO_NAME.to_string(),
        })
    });

    match device {
        Some(DeviceImpl::Uio { path, name }) => {
            let path = path
                .or_else(|| backends::uio::find_device(&name))
                .ok_or_else(|| {
                    format!(
                        "No UIO device named '{}' found. Use gt-prbs uio <path> to specify one.",
                        name
                    )
                })?;
            log::info!("Using UIO device {}", path.display());
            Ok(backends::uio::open(path)?)
        }
        Some(DeviceImpl::Pci { device, bar }) => {
            log::info!("Using BAR {} of PCIe device {}", bar, device);
            Ok(backends::pci::open(&device, bar)?)
        }
        None => Err("No test core could be auto detected. Use gt-prbs uio <path> or gt-prbs pci <device> to specify one.".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    log::info!("Starting GT PRBS test");

    let args = Args::parse();
    let global = global_overrides(&args)?;
    let lanes: BTreeMap<u8, LaneOverrides> = args
        .disable_lane
        .iter()
        .map(|lane| {
            (
                *lane,
                LaneOverrides {
                    enable: Some(false),
                    ..LaneOverrides::default()
                },
            )
        })
        .collect();
    let sequence = (!args.steps.is_empty()).then(|| args.steps.clone());

    let region = Arc::new(open_device(args.device.clone())?);
    let env = Environment {
        config: Builder::new().watchdog_max(args.watchdog_max).build(),
        ..Environment::default()
    };

    let mut tests: Vec<Box<dyn TestCase>> = Vec::new();
    for (i, gt) in args.gt.iter().enumerate() {
        let offset = args.cu_offset + i * args.cu_stride;
        log::debug!("GT {}: compute unit at 0x{:x}", gt, offset);
        let window = CuWindow::new(region.clone(), offset)?;

        let csv_path = args
            .output
            .join(format!("{}_gt_{}.csv", args.kind.output_prefix(), gt));
        log::info!("GT {}: writing measurements to {}", gt, csv_path.display());
        let sink = CsvSink::new(BufWriter::new(File::create(&csv_path)?));

        let params = TestParameters {
            gt_index: *gt,
            global: global.clone(),
            lanes: lanes.clone(),
            sequence: sequence.clone(),
            reported_lanes: args.lanes,
        };
        tests.push(new_test_case(
            args.kind,
            window,
            params,
            env.clone(),
            Box::new(sink),
        ));
    }

    let abort_flags: Vec<_> = tests.iter().map(|test| test.abort_flag().clone()).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, aborting all tests");
            for flag in &abort_flags {
                flag.abort();
            }
        }
    });

    let workers: Vec<_> = tests
        .into_iter()
        .map(|mut test| tokio::task::spawn_blocking(move || (test.name(), execute(test.as_mut()))))
        .collect();

    let mut failed = 0;
    for worker in workers {
        let (name, result) = worker.await?;
        log::info!("{}: {}", name, result);
        if result != TestResult::Passed {
            failed += 1;
        }
    }

    if failed > 0 {
        return Err(format!("{} of {} GT tests did not pass", failed, args.gt.len()).into());
    }
    log::info!("All GT tests passed");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn step_syntax() {
        assert_eq!(parse_step("60:run").unwrap(), RawStep::new(60, "run"));
        assert_eq!(
            parse_step(" 1 : insert_error_lane_2").unwrap(),
            RawStep::new(1, "insert_error_lane_2")
        );
        assert!(parse_step("run").is_err());
        assert!(parse_step("x:run").is_err());
    }

    #[test]
    fn threshold_follows_the_core() {
        assert_eq!(
            threshold(TransceiverKind::Gtm, 1e-12).unwrap(),
            ErrorThreshold::Ber(1e-12)
        );
        assert_eq!(
            threshold(TransceiverKind::GtPrbs, 3.0).unwrap(),
            ErrorThreshold::Percent(3)
        );
        assert!(threshold(TransceiverKind::GtPrbs, 0.5).is_err());
    }

    #[test]
    fn arguments() {
        let args = Args::try_parse_from([
            "gt-prbs",
            "--kind",
            "gtf",
            "--gt",
            "0,1",
            "--cu-offset",
            "0x20000",
            "-s",
            "1:conf_gt",
            "-s",
            "10:run",
            "--disable-lane",
            "3",
            "--rx-lpm",
            "pci",
            "0000:3b:00.1",
        ])
        .unwrap();
        assert_eq!(args.kind, TransceiverKind::Gtf);
        assert_eq!(args.gt, vec![0, 1]);
        assert_eq!(args.cu_offset, 0x20000);
        assert_eq!(args.steps.len(), 2);
        assert_eq!(args.disable_lane, vec![3]);
        let global = global_overrides(&args).unwrap();
        assert_eq!(global.rx_use_lpm, Some(true));
        assert_eq!(global.tx_polarity, None);
        assert!(matches!(args.device, Some(DeviceImpl::Pci { bar: 0, .. })));
    }
}
