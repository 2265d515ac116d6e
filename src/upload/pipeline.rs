//! Background upload pipeline.
//!
//! Every operation runs as its own task on a [`TaskTracker`]. A task checks
//! connectivity, makes one remote call, and reports the result to the
//! [`DataCollector`]. Nothing is retried here; "try again later" belongs to
//! whoever schedules the uploads.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::collector::DataCollector;
use super::connectivity::ConnectivityProbe;
use super::model::{StressReport, UploadBatch, UploadOutcome, UserRecord};
use super::service::UploadService;
use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// Why an upload was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The connectivity probe said no.
    Unreachable,
    /// There was nothing to send.
    NothingToSend,
    /// The pipeline was already closed.
    Closed,
}

/// What became of one upload task.
#[derive(Debug)]
pub enum UploadAttempt {
    /// No remote call was made.
    Skipped(SkipReason),
    /// The service answered.
    Completed(UploadOutcome),
    /// The remote call failed.
    Failed(Error),
    /// The pipeline was closed while the call was in flight.
    Cancelled,
}

impl UploadAttempt {
    /// The service's answer, if there was one.
    pub fn outcome(&self) -> Option<UploadOutcome> {
        match self {
            Self::Completed(outcome) => Some(*outcome),
            _ => None,
        }
    }
}

/// Handle to a spawned upload.
pub type UploadTask = JoinHandle<UploadAttempt>;

/// Uploads surveys and heart rates to the collection service.
pub struct UploadPipeline<S, P, C> {
    service: Arc<S>,
    probe: Arc<P>,
    collector: Arc<C>,
    api_key: Arc<str>,
    close_grace: Duration,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl<S, P, C> UploadPipeline<S, P, C>
where
    S: UploadService + 'static,
    P: ConnectivityProbe + 'static,
    C: DataCollector + 'static,
{
    /// Create a pipeline.
    pub fn new(service: S, probe: P, collector: Arc<C>, config: &UploadConfig) -> Self {
        Self {
            service: Arc::new(service),
            probe: Arc::new(probe),
            collector,
            api_key: Arc::from(config.api_key.as_str()),
            close_grace: config.close_grace(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Whether [`close_connection`](Self::close_connection) has been called.
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Number of uploads still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Tell the service a user's session timer expired. Failures are logged only.
    pub fn ran_out_of_time(&self, user: &str) -> UploadTask {
        let user = user.to_string();
        self.spawn_attempt("out-of-time", move |service, _collector, api_key| async move {
            let outcome = UploadOutcome::from(service.out_of_time(&api_key, &user).await?);
            if !outcome.is_accepted() {
                warn!(
                    "Out-of-time notice for user {}: {}",
                    user,
                    Error::RemoteRejected { code: outcome.code }
                );
            }
            Ok(outcome)
        })
    }

    /// Fetch all users, waiting at most `timeout`.
    ///
    /// Returns an empty list if the service is unreachable, the call fails or
    /// the timeout elapses.
    pub async fn get_all_users(&self, timeout: Duration) -> Vec<UserRecord> {
        if self.is_closed() {
            debug!("get-all-users: pipeline closed");
            return Vec::new();
        }

        let service = Arc::clone(&self.service);
        let probe = Arc::clone(&self.probe);
        let api_key = Arc::clone(&self.api_key);
        let cancel = self.cancel.clone();

        let mut task = self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => Vec::new(),
                users = async {
                    if !probe.is_reachable().await {
                        debug!("get-all-users: {}", Error::Unreachable);
                        return Vec::new();
                    }
                    match service.get_all_users(&api_key).await {
                        Ok(users) => users,
                        Err(e) => {
                            warn!("get-all-users failed: {}", e);
                            Vec::new()
                        }
                    }
                } => users,
            }
        });

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(users)) => {
                debug!("get-all-users returned {} users", users.len());
                users
            }
            Ok(Err(e)) => {
                error!("get-all-users: {}", Error::Internal(e.to_string()));
                Vec::new()
            }
            Err(_) => {
                warn!("get-all-users: {} after {:?}", Error::Timeout, timeout);
                task.abort();
                Vec::new()
            }
        }
    }

    /// Submit surveys in one batch.
    ///
    /// On acceptance the collector marks its outstanding reports complete.
    /// Anything else leaves them for the collector to resend.
    pub fn upload_reports(&self, user: &str, reports: Vec<StressReport>) -> UploadTask {
        if reports.is_empty() {
            return self.tracker.spawn(async {
                UploadAttempt::Skipped(SkipReason::NothingToSend)
            });
        }

        let count = reports.len();
        let batch = UploadBatch::reports(user, reports, &*self.api_key);
        self.spawn_attempt("reports", move |service, collector, _api_key| async move {
            let outcome = UploadOutcome::from(service.new_reports(&batch).await?);
            if outcome.is_accepted() {
                info!("Uploaded {} reports for user {}", count, batch.user());
                collector.complete_outstanding_reports();
            } else {
                warn!(
                    "Report upload for user {}: {}",
                    batch.user(),
                    Error::RemoteRejected { code: outcome.code }
                );
            }
            Ok(outcome)
        })
    }

    /// Submit heart-rate readings paired by position with `timestamps`.
    ///
    /// `resend` marks a batch that previously failed; the collector is told
    /// which of its queues to clear. Rejected batches are handed back via
    /// [`DataCollector::persist_log`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] without contacting the service if the
    /// slices differ in length.
    pub fn upload_heart_beats(
        &self,
        resend: bool,
        user: &str,
        heartbeats: Vec<i32>,
        timestamps: Vec<i64>,
    ) -> Result<UploadTask> {
        let batch = UploadBatch::heartbeats(user, &heartbeats, &timestamps, &*self.api_key)?;
        let user = batch.user().to_string();

        Ok(self.spawn_attempt("heart-rates", move |service, collector, _api_key| async move {
            let outcome = UploadOutcome::from(service.new_heart_rates(&batch).await?);

            if outcome.is_accepted() {
                info!(
                    "Uploaded {} heart rates for user {} (resend: {})",
                    heartbeats.len(),
                    user,
                    resend
                );
                if resend {
                    collector.complete_outstanding_rates();
                } else {
                    collector.complete_rates();
                }
            } else {
                warn!(
                    "Heart-rate upload for user {}: {}, persisting {} readings",
                    user,
                    Error::RemoteRejected { code: outcome.code },
                    heartbeats.len()
                );
                collector.persist_log(heartbeats, timestamps);
            }

            if let Some(request_time) = outcome.follow_up() {
                debug!("Service requested a report at {}", request_time);
                collector.need_report(outcome.code, request_time);
            }

            Ok(outcome)
        }))
    }

    /// Stop accepting uploads and let in-flight ones finish.
    ///
    /// Waits up to the configured grace period, cancels whatever is left, then
    /// releases the transport. Only the first call has any effect.
    pub async fn close_connection(&self) {
        if !self.tracker.close() {
            debug!("Upload pipeline already closed");
            return;
        }

        if tokio::time::timeout(self.close_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "{} uploads still running after {:?}, cancelling",
                self.tracker.len(),
                self.close_grace
            );
        }
        self.cancel.cancel();
        self.service.close();
        info!("Upload pipeline closed");
    }

    fn spawn_attempt<F, Fut>(&self, operation: &'static str, work: F) -> UploadTask
    where
        F: FnOnce(Arc<S>, Arc<C>, Arc<str>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<UploadOutcome>> + Send + 'static,
    {
        if self.is_closed() {
            debug!("{}: pipeline closed", operation);
            return self.tracker.spawn(async { UploadAttempt::Skipped(SkipReason::Closed) });
        }

        let service = Arc::clone(&self.service);
        let probe = Arc::clone(&self.probe);
        let collector = Arc::clone(&self.collector);
        let api_key = Arc::clone(&self.api_key);
        let cancel = self.cancel.clone();

        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("{}: cancelled", operation);
                    UploadAttempt::Cancelled
                }
                attempt = async {
                    if !probe.is_reachable().await {
                        debug!("{}: {}", operation, Error::Unreachable);
                        return UploadAttempt::Skipped(SkipReason::Unreachable);
                    }
                    match work(service, collector, api_key).await {
                        Ok(outcome) => UploadAttempt::Completed(outcome),
                        Err(e) => {
                            warn!("{} upload failed: {}", operation, e);
                            UploadAttempt::Failed(e)
                        }
                    }
                } => attempt,
            }
        })
    }
}

impl<S, P, C> std::fmt::Debug for UploadPipeline<S, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadPipeline")
            .field("close_grace", &self.close_grace)
            .field("in_flight", &self.tracker.len())
            .field("closed", &self.tracker.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::collector::MockDataCollector;
    use crate::upload::connectivity::MockConnectivityProbe;
    use crate::upload::model::{BatchItems, HeartbeatSample, ServiceResponse};
    use crate::upload::service::MockUploadService;
    use async_trait::async_trait;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    fn reachable(yes: bool) -> MockConnectivityProbe {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().returning(move || yes);
        probe
    }

    fn pipeline(
        service: MockUploadService,
        probe: MockConnectivityProbe,
        collector: MockDataCollector,
    ) -> UploadPipeline<MockUploadService, MockConnectivityProbe, MockDataCollector> {
        let config = UploadConfig::new("localhost", "key");
        UploadPipeline::new(service, probe, Arc::new(collector), &config)
    }

    fn report() -> StressReport {
        StressReport::new([1, 2, 3, 4, 5, 6, 7], 1_700_000_000_000)
    }

    #[tokio::test]
    async fn test_accepted_reports_complete_outstanding() {
        let mut service = MockUploadService::new();
        service
            .expect_new_reports()
            .withf(|batch| {
                batch.api_key() == "key"
                    && batch.user() == "42"
                    && batch.items() == &BatchItems::Reports(vec![report()])
            })
            .times(1)
            .returning(|_| Ok(ServiceResponse::code(5)));

        let mut collector = MockDataCollector::new();
        collector.expect_complete_outstanding_reports().times(1).return_const(());

        let pipeline = pipeline(service, reachable(true), collector);
        let attempt = pipeline.upload_reports("42", vec![report()]).await.unwrap();
        assert_eq!(attempt.outcome().map(|o| o.code), Some(5));
    }

    #[tokio::test]
    async fn test_rejected_reports_left_outstanding() {
        let mut service = MockUploadService::new();
        service
            .expect_new_reports()
            .times(1)
            .returning(|_| Ok(ServiceResponse::code(-1)));

        let mut collector = MockDataCollector::new();
        collector.expect_complete_outstanding_reports().never();

        let pipeline = pipeline(service, reachable(true), collector);
        let attempt = pipeline.upload_reports("42", vec![report()]).await.unwrap();
        assert_eq!(attempt.outcome().map(|o| o.code), Some(-1));
    }

    #[tokio::test]
    async fn test_empty_reports_is_noop() {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().never();

        let pipeline = pipeline(MockUploadService::new(), probe, MockDataCollector::new());
        let attempt = pipeline.upload_reports("42", Vec::new()).await.unwrap();
        assert!(matches!(
            attempt,
            UploadAttempt::Skipped(SkipReason::NothingToSend)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_skips_remote_call() {
        let mut service = MockUploadService::new();
        service.expect_new_reports().never();
        let mut collector = MockDataCollector::new();
        collector.expect_complete_outstanding_reports().never();

        let pipeline = pipeline(service, reachable(false), collector);
        let attempt = pipeline.upload_reports("42", vec![report()]).await.unwrap();
        assert!(matches!(
            attempt,
            UploadAttempt::Skipped(SkipReason::Unreachable)
        ));
    }

    #[tokio::test]
    async fn test_transport_error_is_swallowed() {
        let mut service = MockUploadService::new();
        service
            .expect_out_of_time()
            .with(eq("key"), eq("9"))
            .times(1)
            .returning(|_, _| Err(Error::Transport("connection reset".to_string())));

        let pipeline = pipeline(service, reachable(true), MockDataCollector::new());
        let attempt = pipeline.ran_out_of_time("9").await.unwrap();
        assert!(matches!(attempt, UploadAttempt::Failed(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_heart_beats_accepted() {
        let mut service = MockUploadService::new();
        service
            .expect_new_heart_rates()
            .times(2)
            .returning(|_| Ok(ServiceResponse::code(0)));

        let mut collector = MockDataCollector::new();
        collector.expect_complete_rates().times(1).return_const(());
        collector
            .expect_complete_outstanding_rates()
            .times(1)
            .return_const(());
        collector.expect_persist_log().never();
        collector.expect_need_report().never();

        let pipeline = pipeline(service, reachable(true), collector);

        let fresh = assert_ok!(pipeline.upload_heart_beats(false, "3", vec![70], vec![1000]));
        assert!(fresh.await.unwrap().outcome().is_some());

        let resent = assert_ok!(pipeline.upload_heart_beats(true, "3", vec![71], vec![2000]));
        assert!(resent.await.unwrap().outcome().is_some());
    }

    #[tokio::test]
    async fn test_rejected_heart_beats_persisted_in_order() {
        let mut service = MockUploadService::new();
        service
            .expect_new_heart_rates()
            .withf(|batch| {
                batch.items()
                    == &BatchItems::Heartbeats(vec![
                        HeartbeatSample { bpm: 72, timestamp: 10 },
                        HeartbeatSample { bpm: 68, timestamp: 20 },
                        HeartbeatSample { bpm: 90, timestamp: 30 },
                    ])
            })
            .times(1)
            .returning(|_| Ok(ServiceResponse::code(-3)));

        let mut collector = MockDataCollector::new();
        collector.expect_complete_rates().never();
        collector.expect_complete_outstanding_rates().never();
        collector
            .expect_persist_log()
            .withf(|heartbeats, timestamps| {
                heartbeats == &vec![72, 68, 90] && timestamps == &vec![10, 20, 30]
            })
            .times(1)
            .return_const(());

        let pipeline = pipeline(service, reachable(true), collector);
        let task = pipeline
            .upload_heart_beats(false, "3", vec![72, 68, 90], vec![10, 20, 30])
            .unwrap();
        assert_eq!(task.await.unwrap().outcome().map(|o| o.code), Some(-3));
    }

    #[tokio::test]
    async fn test_heart_beats_follow_up_requests_report() {
        let mut service = MockUploadService::new();
        service.expect_new_heart_rates().times(1).returning(|_| {
            Ok(ServiceResponse {
                response: 2,
                requesttime: Some(1_700_000_600_000),
            })
        });

        let mut collector = MockDataCollector::new();
        collector.expect_complete_rates().times(1).return_const(());
        collector
            .expect_need_report()
            .with(eq(2), eq(1_700_000_600_000))
            .times(1)
            .return_const(());

        let pipeline = pipeline(service, reachable(true), collector);
        let task = pipeline
            .upload_heart_beats(false, "3", vec![80], vec![10])
            .unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_heart_beats_length_mismatch_fails_fast() {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_reachable().never();
        let mut service = MockUploadService::new();
        service.expect_new_heart_rates().never();

        let pipeline = pipeline(service, probe, MockDataCollector::new());
        let err = assert_err!(pipeline.upload_heart_beats(false, "3", vec![70, 71], vec![1]));
        assert!(matches!(
            err,
            Error::LengthMismatch {
                heartbeats: 2,
                timestamps: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_get_all_users_unreachable_is_empty() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut service = MockUploadService::new();
        service.expect_get_all_users().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });

        let pipeline = pipeline(service, reachable(false), MockDataCollector::new());
        let users = pipeline.get_all_users(Duration::from_secs(1)).await;
        assert!(users.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_all_users_preserves_order() {
        let mut service = MockUploadService::new();
        service.expect_get_all_users().with(eq("key")).returning(|_| {
            Ok(vec![
                UserRecord {
                    user_id: "2".to_string(),
                    user_name: "bo".to_string(),
                },
                UserRecord {
                    user_id: "1".to_string(),
                    user_name: "al".to_string(),
                },
            ])
        });

        let pipeline = pipeline(service, reachable(true), MockDataCollector::new());
        let users = pipeline.get_all_users(Duration::from_secs(1)).await;
        let ids: Vec<_> = users.iter().map(|u| u.user_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_close_rejects_new_uploads() {
        let mut service = MockUploadService::new();
        service.expect_out_of_time().never();
        service.expect_close().times(1).return_const(());

        let pipeline = pipeline(service, reachable(true), MockDataCollector::new());
        pipeline.close_connection().await;
        pipeline.close_connection().await;
        assert!(pipeline.is_closed());

        let attempt = pipeline.ran_out_of_time("1").await.unwrap();
        assert!(matches!(attempt, UploadAttempt::Skipped(SkipReason::Closed)));
        assert!(pipeline.get_all_users(Duration::from_secs(1)).await.is_empty());
    }

    /// Service whose calls take a minute to answer.
    #[derive(Default)]
    struct SlowService {
        closes: AtomicUsize,
    }

    const SLOW_CALL: Duration = Duration::from_secs(60);

    #[async_trait]
    impl UploadService for SlowService {
        async fn out_of_time(&self, _api_key: &str, _user: &str) -> Result<ServiceResponse> {
            tokio::time::sleep(SLOW_CALL).await;
            Ok(ServiceResponse::code(0))
        }

        async fn get_all_users(&self, _api_key: &str) -> Result<Vec<UserRecord>> {
            tokio::time::sleep(SLOW_CALL).await;
            Ok(vec![UserRecord {
                user_id: "1".to_string(),
                user_name: "al".to_string(),
            }])
        }

        async fn new_reports(&self, _batch: &UploadBatch) -> Result<ServiceResponse> {
            tokio::time::sleep(SLOW_CALL).await;
            Ok(ServiceResponse::code(0))
        }

        async fn new_heart_rates(&self, _batch: &UploadBatch) -> Result<ServiceResponse> {
            tokio::time::sleep(SLOW_CALL).await;
            Ok(ServiceResponse::code(0))
        }

        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn slow_pipeline() -> UploadPipeline<SlowService, MockConnectivityProbe, MockDataCollector> {
        let config = UploadConfig::new("localhost", "key");
        UploadPipeline::new(
            SlowService::default(),
            reachable(true),
            Arc::new(MockDataCollector::new()),
            &config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_after_grace() {
        let pipeline = slow_pipeline();
        let in_flight = pipeline.ran_out_of_time("5");
        tokio::task::yield_now().await;
        assert_eq!(pipeline.in_flight(), 1);

        let started = tokio::time::Instant::now();
        pipeline.close_connection().await;
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < SLOW_CALL);

        assert!(matches!(in_flight.await.unwrap(), UploadAttempt::Cancelled));
        assert_eq!(pipeline.service.closes.load(Ordering::SeqCst), 1);
        assert!(pipeline.get_all_users(Duration::from_secs(5)).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_all_users_times_out_empty() {
        let pipeline = slow_pipeline();

        let started = tokio::time::Instant::now();
        let users = pipeline.get_all_users(Duration::from_secs(2)).await;
        assert!(users.is_empty());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < SLOW_CALL);
    }
}
