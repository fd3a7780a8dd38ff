//! TelemetryRecorder port - business-level work item telemetry.
//!
//! The engine reports two things: that a message was received (with how
//! long it waited compared to the delay the producer asked for), and how
//! each processing attempt ended. Sinks are external; two stock recorders
//! live here: one that writes tracing events and one that drops everything.

use std::time::{Duration, Instant};

/// Open for the duration of one processing attempt; reports on drop.
pub trait TelemetryScope: Send {
    /// Called when the processor reported success.
    fn set_success(&mut self);
}

pub trait TelemetryRecorder: Send + Sync {
    fn record_work_item_completion(
        &self,
        work_item_type: &str,
        attempt: u32,
        operation_id: &str,
    ) -> Box<dyn TelemetryScope>;

    /// `intended_delay` comes from the envelope; `waited` is the time the
    /// message actually spent in the queue before this receive.
    fn record_message_receipt(
        &self,
        work_item_type: &str,
        intended_delay: Option<Duration>,
        waited: Duration,
    );
}

/// Writes completions and receipts as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetryRecorder;

impl TelemetryRecorder for TracingTelemetryRecorder {
    fn record_work_item_completion(
        &self,
        work_item_type: &str,
        attempt: u32,
        operation_id: &str,
    ) -> Box<dyn TelemetryScope> {
        Box::new(TracingTelemetryScope {
            work_item_type: work_item_type.to_string(),
            attempt,
            operation_id: operation_id.to_string(),
            started_at: Instant::now(),
            success: false,
        })
    }

    fn record_message_receipt(
        &self,
        work_item_type: &str,
        intended_delay: Option<Duration>,
        waited: Duration,
    ) {
        let intended_ms = intended_delay.map(|d| d.as_millis() as u64).unwrap_or(0);
        let waited_ms = waited.as_millis() as u64;
        tracing::info!(
            work_item_type,
            intended_delay_ms = intended_ms,
            waited_ms,
            extra_wait_ms = waited_ms.saturating_sub(intended_ms),
            "work item received"
        );
    }
}

struct TracingTelemetryScope {
    work_item_type: String,
    attempt: u32,
    operation_id: String,
    started_at: Instant,
    success: bool,
}

impl TelemetryScope for TracingTelemetryScope {
    fn set_success(&mut self) {
        self.success = true;
    }
}

impl Drop for TracingTelemetryScope {
    fn drop(&mut self) {
        tracing::info!(
            work_item_type = %self.work_item_type,
            attempt = self.attempt,
            operation_id = %self.operation_id,
            success = self.success,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "work item completion"
        );
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTelemetryRecorder;

struct NoTelemetryScope;

impl TelemetryScope for NoTelemetryScope {
    fn set_success(&mut self) {}
}

impl TelemetryRecorder for NoTelemetryRecorder {
    fn record_work_item_completion(
        &self,
        _work_item_type: &str,
        _attempt: u32,
        _operation_id: &str,
    ) -> Box<dyn TelemetryScope> {
        Box::new(NoTelemetryScope)
    }

    fn record_message_receipt(
        &self,
        _work_item_type: &str,
        _intended_delay: Option<Duration>,
        _waited: Duration,
    ) {
    }
}
