//! Completion callbacks into the local data store.

/// Local bookkeeping notified as uploads finish.
///
/// Implementations must be cheap and non-blocking; they are called from the
/// upload tasks.
#[cfg_attr(test, mockall::automock)]
pub trait DataCollector: Send + Sync {
    /// Previously queued surveys were accepted.
    fn complete_outstanding_reports(&self);

    /// A resent batch of heart rates was accepted.
    fn complete_outstanding_rates(&self);

    /// A fresh batch of heart rates was accepted.
    fn complete_rates(&self);

    /// Heart rates the service rejected, handed back for local persistence.
    fn persist_log(&self, heartbeats: Vec<i32>, timestamps: Vec<i64>);

    /// The service asked for a survey at `request_time`.
    fn need_report(&self, status: i32, request_time: i64);
}
