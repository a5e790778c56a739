//! One detection pass followed by notification of what it found.
//!
//! This is the unit of work behind the `detect` command and every tick of
//! `start`'s schedule.

use chrono::NaiveDateTime;

use crate::detection::{DetectionEngine, DetectionRun};
use crate::notify::{DeliveryReport, Notifier};
use crate::store::EventStore;
use crate::{NmasConfig, NmasResult};

#[derive(Debug, Clone)]
pub struct PassReport {
    pub run: DetectionRun,
    pub delivery: DeliveryReport,
}

impl PassReport {
    pub fn new_alert_count(&self) -> usize {
        self.run.new_alert_count()
    }
}

/// Detect at `now`, then hand the newly stored alerts to the fan-out.
///
/// Store failures abort the pass. Channel failures do not; they show up in
/// `PassReport::delivery`.
pub fn run_detection_pass(
    store: &EventStore,
    config: &NmasConfig,
    now: NaiveDateTime,
) -> NmasResult<PassReport> {
    let run = DetectionEngine::new(&config.detection).run(store, now)?;
    let delivery = Notifier::new(config).dispatch(&run.inserted);
    Ok(PassReport { run, delivery })
}
