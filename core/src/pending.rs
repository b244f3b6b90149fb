//! Fire-and-forget store operations.
//!
//! The driving loop queues operations and moves on. The queue is applied
//! in FIFO order at barriers, at the end of a run, and whenever it fills
//! up. Failures surface through the returned `DrainReport`.

use crate::{
    error::{SimError, SimResult},
    scorer::{ActivityEvent, ScoreOutcome},
    service::SimboxService,
    types::{DeviceId, LocationId, Timestamp},
};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    RegisterDevice {
        device_id: DeviceId,
        location_id: LocationId,
        created_at: Timestamp,
        at: Timestamp,
    },
    ReportLocationChange {
        device_id: DeviceId,
        location_id: LocationId,
        at: Timestamp,
    },
    ReportActivity {
        event: ActivityEvent,
        at: Timestamp,
    },
}

impl StoreOp {
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::RegisterDevice { device_id, .. } | Self::ReportLocationChange { device_id, .. } => *device_id,
            Self::ReportActivity { event, .. } => event.device_id,
        }
    }

    fn apply(&self, service: &SimboxService) -> SimResult<Option<ScoreOutcome>> {
        match self {
            Self::RegisterDevice {
                device_id,
                location_id,
                created_at,
                at,
            } => service
                .register_device(*device_id, *location_id, *created_at, *at)
                .map(|_| None),
            Self::ReportLocationChange {
                device_id,
                location_id,
                at,
            } => service
                .report_location_change(*device_id, *location_id, *at)
                .map(|_| None),
            Self::ReportActivity { event, at } => service.report_activity(event, *at).map(Some),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: u64,
    pub failed: u64,
    pub flagged: u64,
    pub cleared: u64,
    pub skipped_young: u64,
}

impl DrainReport {
    pub fn absorb(&mut self, other: DrainReport) {
        self.applied += other.applied;
        self.failed += other.failed;
        self.flagged += other.flagged;
        self.cleared += other.cleared;
        self.skipped_young += other.skipped_young;
    }
}

pub struct PendingOps {
    queue: VecDeque<StoreOp>,
    max_outstanding: usize,
    strict: bool,
}

impl PendingOps {
    /// In strict mode the caller vouches that every device and location it
    /// names was registered, so a validation failure means the caller's
    /// own state is wrong and the drain stops with `StateInconsistency`.
    pub fn new(max_outstanding: usize, strict: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            max_outstanding: max_outstanding.max(1),
            strict,
        }
    }

    /// Queue an operation. Returns true when the queue is full and must
    /// be drained before more work is issued.
    pub fn push(&mut self, op: StoreOp) -> bool {
        self.queue.push_back(op);
        self.queue.len() >= self.max_outstanding
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Apply everything queued. Event-local failures are logged and
    /// counted; anything else stops the drain and is returned.
    pub fn drain(&mut self, service: &SimboxService) -> SimResult<DrainReport> {
        let mut report = DrainReport::default();
        while let Some(op) = self.queue.pop_front() {
            match op.apply(service) {
                Ok(outcome) => {
                    report.applied += 1;
                    match outcome {
                        Some(ScoreOutcome::Flagged { .. }) => report.flagged += 1,
                        Some(ScoreOutcome::Cleared) => report.cleared += 1,
                        Some(ScoreOutcome::SkippedYoung) => report.skipped_young += 1,
                        None => {}
                    }
                }
                Err(e) if self.strict && e.is_validation() => {
                    self.queue.clear();
                    return Err(SimError::StateInconsistency {
                        detail: format!("{op:?} rejected: {e}"),
                    });
                }
                Err(e) if e.is_event_local() => {
                    log::warn!("device {} op failed: {e}", op.device_id());
                    report.failed += 1;
                }
                Err(e) => {
                    self.queue.clear();
                    return Err(e);
                }
            }
        }
        Ok(report)
    }
}
