//! Periodic scheduler driving the measurement pipeline

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::error::Result;

/// Subtracted from the poll interval so the timer runs slightly fast:
/// a late tick then costs a duplicate instead of a lost sample
pub const TIMER_REDUCTION_US: u64 = 200;

/// Delay before the first tick after start
pub const FIRST_TICK_DELAY_US: u64 = 1_000;

/// Timer period for a poll interval
pub fn timer_period_us(call_interval_us: u64) -> u64 {
    call_interval_us.saturating_sub(TIMER_REDUCTION_US).max(1)
}

/// Handle to a running sampling thread
///
/// The task closure is called once per period and returns the current poll
/// interval in µs; returning `None` or 0 ends sampling.
pub struct Sampler {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<F>(mut task: F) -> Result<Self>
    where
        F: FnMut() -> Option<u64> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = thread::Builder::new()
            .name("icm20602-sampler".into())
            .spawn(move || {
                let mut next_tick = Instant::now() + Duration::from_micros(FIRST_TICK_DELAY_US);

                loop {
                    // park until the tick is due; stop() unparks us early
                    loop {
                        if flag.load(Ordering::Acquire) {
                            return;
                        }
                        let now = Instant::now();
                        if now >= next_tick {
                            break;
                        }
                        thread::park_timeout(next_tick - now);
                    }

                    let interval = match task() {
                        Some(interval) if interval > 0 => interval,
                        _ => {
                            debug!("Sampling task finished");
                            return;
                        }
                    };

                    next_tick += Duration::from_micros(timer_period_us(interval));
                    // If we're running behind, don't sleep and continue immediately
                }
            })?;

        info!("Sampling started");
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the timer and wait for an in-flight cycle to finish
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
            info!("Sampling stopped");
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_timer_period() {
        assert_eq!(timer_period_us(1_000), 800);
        assert_eq!(timer_period_us(100), 1);
    }

    #[test]
    fn test_sampler_ticks_until_stopped() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&ticks);
        let mut sampler = Sampler::spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(1_000)
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));
        sampler.stop();
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop > 5, "only {} ticks", after_stop);

        thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_task_can_end_sampling() {
        let mut sampler = Sampler::spawn(|| None).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!sampler.is_running());
        sampler.stop();
    }
}
