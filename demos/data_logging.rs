//! Example: Data logging with timestamp
//!
//! Samples the simulated sensor at 500 Hz and logs every filtered accel and
//! gyro report to a CSV file.
//!
//! Run with: cargo run --example data_logging

use std::fs::File;
use std::io::Write;
use std::time::{Duration, Instant};

use icm20602_driver::{DriverConfig, Icm20602, PollRate, SimulatedIcm20602};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("Data Logging Example");
    println!("====================\n");

    let sensor = Icm20602::new(SimulatedIcm20602::new(), DriverConfig::default())?;
    let accel = sensor.accel();
    let gyro = sensor.gyro();
    accel.set_queue_depth(20)?;
    gyro.set_queue_depth(20)?;

    let mut log_file = File::create("sensor_log.csv")?;
    writeln!(
        log_file,
        "timestamp_us,accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,temperature"
    )?;

    println!("Logging data at 500 Hz for 5 seconds...");
    println!("Output file: sensor_log.csv\n");

    sensor.set_poll_rate(PollRate::Hz(500))?;
    let start_time = Instant::now();
    let log_duration = Duration::from_secs(5);
    let mut rows = 0usize;

    while start_time.elapsed() < log_duration {
        if !accel.wait_for_data(Duration::from_millis(50))? {
            continue;
        }
        // Pair each accel report with the gyro report from the same cycle
        let accel_reports = accel.read(20)?;
        let gyro_reports = gyro.read(20).unwrap_or_default();
        for (a, g) in accel_reports.iter().zip(&gyro_reports) {
            writeln!(
                log_file,
                "{},{:.4},{:.4},{:.4},{:.4},{:.4},{:.4},{:.2}",
                a.timestamp_us,
                a.filtered[0],
                a.filtered[1],
                a.filtered[2],
                g.filtered[0],
                g.filtered[1],
                g.filtered[2],
                a.temperature
            )?;
            rows += 1;
        }
    }
    sensor.stop()?;

    let stats = sensor.stats();
    println!("Logged {} rows", rows);
    println!("Average rate: {:.1} Hz", rows as f64 / log_duration.as_secs_f64());
    println!("Cycles: {}, duplicates: {}", stats.cycles, stats.duplicates);
    println!("\nLog file saved successfully!");

    Ok(())
}
