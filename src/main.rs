//! ICM-20602 command-line tool
//!
//! Brings the sensor up on the selected bus and runs one command against it.
//!
//! Usage:
//!   icm20602 --bus ftdi start --duration 10
//!   icm20602 -X -R 4 info

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, warn};

use icm20602_driver::{
    BusId, DriverConfig, DriverError, DriverRegistry, Icm20602, Rotation, SimulatedIcm20602,
};

#[derive(Parser, Debug)]
#[command(name = "icm20602")]
#[command(about = "ICM-20602 IMU driver", long_about = None)]
struct Args {
    /// Sensor on the external bus
    #[arg(short = 'X', long)]
    external: bool,

    /// Sensor-to-body rotation index (0-25)
    #[arg(short = 'R', long, default_value = "0")]
    rotation: u8,

    /// Accel range in g; rounded up to 2, 4, 8 or 16
    #[arg(short = 'a', long, default_value = "8")]
    accel_range: u32,

    /// Register bus backend
    #[arg(long, value_enum, default_value = "sim")]
    bus: BusKind,

    /// FTDI SPI channel index
    #[arg(long, default_value = "0")]
    channel: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BusKind {
    /// In-process simulated sensor
    Sim,
    /// FT232H SPI channel
    Ftdi,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample and print reports until Ctrl+C
    Start {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Read one report per channel and run the calibration self-tests
    Test,
    /// Re-run sensor bring-up
    Reset,
    /// Print counters, queue state and register health
    Info,
    /// Dump registers 0-108
    Regdump,
    /// Provoke a recoverable register error, then dump registers
    Testerror,
}

fn open(args: &Args) -> icm20602_driver::Result<Icm20602> {
    let rotation = Rotation::from_index(args.rotation).ok_or_else(|| {
        DriverError::InvalidArgument(format!("rotation index {} out of range", args.rotation))
    })?;
    let config = DriverConfig {
        rotation,
        accel_range_g: args.accel_range,
        ..DriverConfig::default()
    };

    match args.bus {
        BusKind::Sim => Icm20602::new(SimulatedIcm20602::with_placement(args.external), config),
        BusKind::Ftdi => open_ftdi(args.channel, args.external, config),
    }
}

#[cfg(feature = "ftdi")]
fn open_ftdi(channel: u32, external: bool, config: DriverConfig) -> icm20602_driver::Result<Icm20602> {
    let bus = icm20602_driver::FtdiSpiBus::open(channel, external)?;
    Icm20602::new(bus, config)
}

#[cfg(not(feature = "ftdi"))]
fn open_ftdi(_channel: u32, _external: bool, _config: DriverConfig) -> icm20602_driver::Result<Icm20602> {
    Err(DriverError::Unsupported(
        "built without the `ftdi` feature".into(),
    ))
}

fn print_dump(registers: &[(u8, u8)]) {
    for row in registers.chunks(8) {
        let line: Vec<String> = row
            .iter()
            .map(|(reg, value)| format!("{:3}:{:02x}", reg, value))
            .collect();
        println!("{}", line.join(" "));
    }
}

fn run_start(sensor: &Icm20602, duration: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let accel = sensor.accel();
    let gyro = sensor.gyro();
    let end_time = duration.map(|d| Instant::now() + Duration::from_secs(d));
    let mut last_print = Instant::now();

    println!("Press Ctrl+C to stop\n");
    while running.load(Ordering::SeqCst) && end_time.map_or(true, |end| Instant::now() < end) {
        if !accel.wait_for_data(Duration::from_millis(100))? {
            warn!("No accel data within 100 ms");
            continue;
        }
        if last_print.elapsed() < Duration::from_millis(100) {
            continue;
        }
        last_print = Instant::now();

        let a = accel.read(1)?[0];
        match gyro.read(1) {
            Ok(reports) => {
                let g = reports[0];
                println!(
                    "{:>12} us  accel [{:7.3} {:7.3} {:7.3}] m/s^2  gyro [{:7.3} {:7.3} {:7.3}] rad/s  {:5.1} C",
                    a.timestamp_us,
                    a.filtered[0],
                    a.filtered[1],
                    a.filtered[2],
                    g.filtered[0],
                    g.filtered[1],
                    g.filtered[2],
                    a.temperature
                );
            }
            Err(DriverError::NoData) => {}
            Err(e) => return Err(e.into()),
        }
    }

    println!("\n{}", sensor.info());
    Ok(())
}

fn run_test(sensor: &Icm20602) -> icm20602_driver::Result<()> {
    let accel = sensor.accel();
    let gyro = sensor.gyro();

    let a = accel.read(1)?[0];
    println!("ACCEL");
    println!("  raw:        {:?}", a.raw);
    println!("  calibrated: {:?} m/s^2", a.calibrated);
    println!("  range:      {} g ({:.2} m/s^2)", accel.range()?, a.range_m_s2);
    println!("  temp:       {:.2} C (raw {})", a.temperature, a.temperature_raw);

    let g = gyro.read(1)?[0];
    println!("GYRO");
    println!("  raw:        {:?}", g.raw);
    println!("  calibrated: {:?} rad/s", g.calibrated);
    println!("  range:      {} dps ({:.2} rad/s)", gyro.range()?, g.range_rad_s);

    println!(
        "self-test: accel {} gyro {}",
        if accel.self_test()? { "PASS" } else { "FAIL" },
        if gyro.self_test()? { "PASS" } else { "FAIL" }
    );
    Ok(())
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let bus = if args.external {
        BusId::External
    } else {
        BusId::Internal
    };

    let mut registry = DriverRegistry::new();
    let sensor = registry.start(bus, || open(&args))?;
    info!("Device id 0x{:08x} on {} bus", sensor.device_id(), bus);

    match args.command {
        Command::Start { duration } => run_start(sensor, duration)?,
        Command::Test => run_test(sensor)?,
        Command::Reset => {
            sensor.reset()?;
            println!("reset ok");
        }
        Command::Info => println!("{}", sensor.info()),
        Command::Regdump => print_dump(&sensor.register_dump()?),
        Command::Testerror => print_dump(&sensor.test_error()?),
    }

    registry.stop(bus)?;
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    println!("ICM-20602 driver");
    println!("================");
    println!("Started: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    println!("Bus: {:?}, external: {}\n", args.bus, args.external);

    if let Err(e) = run(args) {
        error!("{}", e);
        if let Some(DriverError::HardwareUnavailable { .. } | DriverError::InvalidDeviceId(_)) =
            e.downcast_ref::<DriverError>()
        {
            eprintln!("Please check:");
            eprintln!("  1. FT232H is connected via USB");
            eprintln!("  2. ICM-20602 is wired to the FT232H SPI pins (mode 3)");
            eprintln!("  3. Power supply to the sensor is 3.3V");
        }
        std::process::exit(1);
    }
}
