//! Publication of finished reports to subscribers

use std::sync::mpsc::{self, Receiver, Sender};

use crate::report::{AccelReport, GyroReport};

/// Sink for reports whose integration window closed
///
/// Called from the sampling context with the driver state locked, so
/// implementations must not block.
pub trait ReportPublisher: Send {
    fn publish_accel(&mut self, report: &AccelReport);
    fn publish_gyro(&mut self, report: &GyroReport);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPublisher;

impl ReportPublisher for NullPublisher {
    fn publish_accel(&mut self, _report: &AccelReport) {}
    fn publish_gyro(&mut self, _report: &GyroReport) {}
}

/// Either report kind, as delivered over a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorReport {
    Accel(AccelReport),
    Gyro(GyroReport),
}

impl SensorReport {
    pub fn timestamp_us(&self) -> u64 {
        match self {
            SensorReport::Accel(r) => r.timestamp_us,
            SensorReport::Gyro(r) => r.timestamp_us,
        }
    }
}

/// Forwards reports into an mpsc channel
///
/// A disconnected receiver is not an error; reports are dropped.
pub struct ChannelPublisher {
    tx: Sender<SensorReport>,
}

impl ChannelPublisher {
    /// Create a publisher and the receiving end subscribers read from
    pub fn channel() -> (Self, Receiver<SensorReport>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ReportPublisher for ChannelPublisher {
    fn publish_accel(&mut self, report: &AccelReport) {
        let _ = self.tx.send(SensorReport::Accel(*report));
    }

    fn publish_gyro(&mut self, report: &GyroReport) {
        let _ = self.tx.send(SensorReport::Gyro(*report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_publisher_delivers_in_order() {
        let (mut publisher, rx) = ChannelPublisher::channel();
        let accel = AccelReport {
            timestamp_us: 10,
            ..Default::default()
        };
        let gyro = GyroReport {
            timestamp_us: 10,
            ..Default::default()
        };
        publisher.publish_accel(&accel);
        publisher.publish_gyro(&gyro);

        assert_eq!(rx.try_recv().unwrap(), SensorReport::Accel(accel));
        let next = rx.try_recv().unwrap();
        assert_eq!(next, SensorReport::Gyro(gyro));
        assert_eq!(next.timestamp_us(), 10);
    }

    #[test]
    fn test_disconnected_receiver_is_ignored() {
        let (mut publisher, rx) = ChannelPublisher::channel();
        drop(rx);
        publisher.publish_accel(&AccelReport::default());
    }
}
