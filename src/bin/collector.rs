//! ICM-20602 Data Collector
//!
//! Samples the sensor periodically and records every published accel and gyro
//! report to an HDF5 file.
//!
//! Usage:
//!   collector --output data.h5 --rate 1000 --duration 60

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use log::{error, info, warn};

use icm20602_driver::{
    AccelReport, ChannelPublisher, DriverConfig, GyroReport, Hdf5Writer, Icm20602, MonotonicClock,
    PollRate, SensorReport, SimulatedIcm20602,
};

/// Reports buffered per channel before a batch write
const BATCH_SIZE: usize = 100;

#[derive(Parser, Debug)]
#[command(name = "collector")]
#[command(about = "Collect ICM-20602 reports to an HDF5 file", long_about = None)]
struct Args {
    /// Output HDF5 file path
    #[arg(short, long, default_value = "sensor_data.h5")]
    output: PathBuf,

    /// Poll rate in Hz (1-1000)
    #[arg(short, long, default_value = "1000")]
    rate: u32,

    /// Duration in seconds (optional, runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,

    /// Accel range in g
    #[arg(short, long, default_value = "8")]
    accel_range: u32,

    /// Use the FT232H SPI bus on this channel instead of the simulator
    #[arg(long)]
    ftdi_channel: Option<u32>,
}

fn open(args: &Args, publisher: ChannelPublisher) -> icm20602_driver::Result<Icm20602> {
    let config = DriverConfig {
        accel_range_g: args.accel_range,
        ..DriverConfig::default()
    };
    let bus: Box<dyn icm20602_driver::RegisterBus> = match args.ftdi_channel {
        #[cfg(feature = "ftdi")]
        Some(channel) => Box::new(icm20602_driver::FtdiSpiBus::open(channel, false)?),
        #[cfg(not(feature = "ftdi"))]
        Some(_) => {
            return Err(icm20602_driver::DriverError::Unsupported(
                "built without the `ftdi` feature".into(),
            ))
        }
        None => Box::new(SimulatedIcm20602::new()),
    };
    Icm20602::with_parts(
        bus,
        Arc::new(MonotonicClock::new()),
        Box::new(publisher),
        config,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.rate == 0 || args.rate > 1000 {
        eprintln!("Error: rate must be 1-1000 Hz");
        std::process::exit(1);
    }

    println!("ICM-20602 Data Collector");
    println!("========================");
    println!("Poll rate: {} Hz", args.rate);
    println!("Output file: {}", args.output.display());
    if let Some(duration) = args.duration {
        println!("Duration: {} seconds", duration);
    } else {
        println!("Duration: continuous (Ctrl+C to stop)");
    }
    println!();

    let (publisher, reports) = ChannelPublisher::channel();
    let sensor = open(&args, publisher)?;
    info!("Sensor initialized, device id 0x{:08x}", sensor.device_id());

    let mut writer = Hdf5Writer::create(&args.output, args.rate as f64, sensor.accel().range()?)?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, stopping collection...");
        r.store(false, Ordering::SeqCst);
    })?;

    let collection_start = Instant::now();
    let end_time = args
        .duration
        .map(|d| collection_start + Duration::from_secs(d));

    sensor.set_poll_rate(PollRate::Hz(args.rate))?;

    let mut accel_batch: Vec<AccelReport> = Vec::with_capacity(BATCH_SIZE);
    let mut gyro_batch: Vec<GyroReport> = Vec::with_capacity(BATCH_SIZE);
    let mut last_flush = Instant::now();

    let result = (|| -> icm20602_driver::Result<()> {
        while running.load(Ordering::SeqCst) && end_time.map_or(true, |end| Instant::now() < end) {
            match reports.recv_timeout(Duration::from_millis(100)) {
                Ok(SensorReport::Accel(report)) => accel_batch.push(report),
                Ok(SensorReport::Gyro(report)) => gyro_batch.push(report),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("No reports within 100 ms");
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if accel_batch.len() >= BATCH_SIZE {
                writer.append_accel(&accel_batch)?;
                accel_batch.clear();
            }
            if gyro_batch.len() >= BATCH_SIZE {
                writer.append_gyro(&gyro_batch)?;
                gyro_batch.clear();
            }

            // Periodic flush (every 10 seconds)
            if last_flush.elapsed() >= Duration::from_secs(10) {
                writer.flush()?;
                last_flush = Instant::now();
            }
        }

        sensor.stop()?;
        writer.append_accel(&accel_batch)?;
        writer.append_gyro(&gyro_batch)?;
        writer.flush()
    })();

    if let Err(e) = result {
        error!("Error during collection: {}", e);
        eprintln!("Attempting to flush data...");
        if let Err(flush_err) = writer.flush() {
            eprintln!("Failed to flush: {}", flush_err);
        }
        return Err(e.into());
    }

    let elapsed = collection_start.elapsed().as_secs_f64();
    let stats = sensor.stats();
    println!("\nCollection complete!");
    println!("Accel reports: {}", writer.accel_count());
    println!("Gyro reports: {}", writer.gyro_count());
    println!("Elapsed time: {:.2} seconds", elapsed);
    println!(
        "Publication rate: {:.1} Hz",
        writer.accel_count() as f64 / elapsed
    );
    println!(
        "Cycles: {}, duplicates: {}, errors: {}",
        stats.cycles,
        stats.duplicates,
        stats.error_count()
    );
    println!("File: {}", args.output.display());

    Ok(())
}
