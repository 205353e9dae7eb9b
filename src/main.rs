use std::io::{self, Write};
use std::process::exit;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use log::{info, warn};

use irarray_rs::{
    logging, peak_sensor, to_voltage, Aggregator, BusMaster, BusState, CaptureWriter, Frame,
    Indicator, IrArray, LogIndicator, ProcessOutcome, ReadStatus, SourceId, TextSink, FRAME_LEN,
    SENSOR_COUNT,
};

#[derive(Parser, Debug)]
#[command(
    name = "irarray-demo",
    about = "Run the acquisition pipeline against a simulated bus"
)]
struct Args {
    /// Averaging window depth (1-10; 0 disables processing)
    #[arg(long, default_value_t = 5)]
    depth: usize,
    /// Number of acquisition cycles to run
    #[arg(long, default_value_t = 60)]
    cycles: usize,
    /// Print frames as raw hex instead of decimal
    #[arg(long)]
    hex: bool,
    /// Compensated level above which the indicator lights
    #[arg(long, default_value_t = 200)]
    threshold: u16,
    /// Serial port for diagnostic output (stdout when omitted)
    #[arg(long)]
    serial: Option<String>,
    /// Baud rate for the serial diagnostic port
    #[arg(long, default_value_t = 115200)]
    baud: u32,
}

/// Loopback stand-in for the bus master: every armed read completes
/// immediately with a synthetic frame. A simulated target sweeps across the
/// sensors of the head at address 0x30 so the pipeline has something to find.
struct SimulatedBus {
    tick: u32,
}

impl SimulatedBus {
    fn new() -> Self {
        SimulatedBus { tick: 0 }
    }

    fn synth_frame(&self, device_addr: u8) -> [u8; FRAME_LEN] {
        // Ambient floor with slow drift, plus a moving bump on one head.
        let ambient = 900 + (self.tick % 16) as u16;
        let mut sensors = [ambient; SENSOR_COUNT];
        if device_addr == 0x30 {
            let hot = (self.tick as usize / 8) % SENSOR_COUNT;
            sensors[hot] = sensors[hot].saturating_add(400);
        }
        let mut bytes = [0u8; FRAME_LEN];
        Frame {
            vref: 2048,
            sensors,
        }
        .encode(&mut bytes);
        bytes
    }
}

impl BusMaster for SimulatedBus {
    fn state(&self) -> BusState {
        BusState::Ready
    }

    fn begin_read(
        &mut self,
        device_addr: u8,
        _len: usize,
        capture: CaptureWriter,
    ) -> irarray_rs::Result<()> {
        self.tick += 1;
        capture.complete_with(&self.synth_frame(device_addr));
        Ok(())
    }
}

fn main() {
    logging::init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    match args.serial.clone() {
        Some(path) => {
            info!("diagnostic output on {path} at {} baud", args.baud);
            pump(&args, TextSink::open_serial(&path, args.baud)?)
        }
        None => pump(&args, TextSink::new(io::stdout())),
    }
}

fn pump<W: Write>(args: &Args, mut sink: TextSink<W>) -> Result<()> {
    let mut array = IrArray::with_ports(SimulatedBus::new(), SimulatedBus::new());
    let mut aggregator = Aggregator::new();
    let mut led = LogIndicator::default();

    info!(
        "starting: depth={}, cycles={}, threshold={}",
        args.depth, args.cycles, args.threshold
    );

    for _ in 0..args.cycles {
        for id in SourceId::ALL {
            match array.request_read(id)? {
                ReadStatus::Armed => {}
                ReadStatus::Busy => warn!("source {id}: bus busy, retrying next cycle"),
            }
        }

        // Cross-source work waits until both heads have fresh frames.
        if !array.all_ready() {
            thread::sleep(Duration::from_millis(2));
            continue;
        }

        let mut vectors = [[0u16; SENSOR_COUNT]; 2];
        let mut complete = true;
        for id in SourceId::ALL {
            let Some(mut bytes) = array.try_take(id) else {
                complete = false;
                continue;
            };
            match aggregator.process(id, &mut bytes, args.depth) {
                ProcessOutcome::Compensated(values) => {
                    vectors[id.index()] = values;
                    if args.hex {
                        sink.write_hex(&bytes)?;
                    } else {
                        sink.write_decimal(&bytes)?;
                    }
                }
                ProcessOutcome::Filling | ProcessOutcome::Disabled => complete = false,
            }
        }

        if complete {
            let (idx, value) = peak_sensor(&vectors[0], &vectors[1]);
            if value > args.threshold {
                info!(
                    "peak sensor {idx}: {value} ({:.3} V ref scale)",
                    to_voltage(value, 3.3)
                );
                led.on();
            } else {
                led.off();
            }
        }

        thread::sleep(Duration::from_millis(10));
    }

    sink.flush()?;
    Ok(())
}
