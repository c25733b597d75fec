//! Example: Register corruption and recovery
//!
//! Drives the pipeline by hand on a simulated sensor with a manual clock,
//! corrupts configuration registers behind the driver's back and prints how
//! the health monitor repairs them.
//!
//! Run with: cargo run --example recovery_demo

use std::sync::Arc;

use icm20602_driver::registers::{REG_CONFIG, REG_PWR_MGMT_1};
use icm20602_driver::{
    CycleOutcome, DriverConfig, Icm20602, ManualClock, NullPublisher, SimulatedIcm20602,
};

/// One cycle per millisecond, like a 1 kHz poll rate
const STEP_US: u64 = 1_000;

fn run_cycles(sensor: &Icm20602, clock: &ManualClock, cycles: usize) -> icm20602_driver::Result<()> {
    let mut last: Option<CycleOutcome> = None;
    let mut repeats = 0;

    for _ in 0..cycles {
        clock.advance(STEP_US);
        let outcome = sensor.measure()?;
        if last == Some(outcome) {
            repeats += 1;
            continue;
        }
        if repeats > 0 {
            println!("    ... x{}", repeats + 1);
            repeats = 0;
        }
        println!("  {:?}", outcome);
        last = Some(outcome);
    }
    if repeats > 0 {
        println!("    ... x{}", repeats + 1);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("Recovery Example");
    println!("================\n");

    let sim = SimulatedIcm20602::new();
    let handle = sim.handle();
    let clock = Arc::new(ManualClock::new(1));
    let sensor = Icm20602::with_parts(
        Box::new(sim),
        clock.clone(),
        Box::new(NullPublisher),
        DriverConfig::default(),
    )?;

    println!("Healthy sampling:");
    run_cycles(&sensor, &clock, 10)?;

    println!("\nClock source lost (PWR_MGMT_1 back to its power-on value):");
    handle.corrupt_register(REG_PWR_MGMT_1, 0x41);
    run_cycles(&sensor, &clock, 60)?;
    println!("Full resets issued: {}", handle.reset_count());

    println!("\nDLPF setting lost while still settling:");
    handle.corrupt_register(REG_PWR_MGMT_1, 0x41);
    run_cycles(&sensor, &clock, 14)?;
    handle.corrupt_register(REG_CONFIG, 0x00);
    run_cycles(&sensor, &clock, 60)?;

    println!("\n{}", sensor.info());
    Ok(())
}
