//! Upload data model and wire records.
//!
//! Domain types ([`StressReport`], [`HeartbeatSample`], [`UploadBatch`],
//! [`UploadOutcome`]) plus the request/response records exchanged with the
//! collection service.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Number of answer slots in a stress survey.
pub const STRESS_REPORT_ANSWERS: usize = 7;

/// One completed stress survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StressReport {
    /// Answers to the seven survey questions, in question order.
    pub answers: [i32; STRESS_REPORT_ANSWERS],
    /// When the survey was completed, in epoch milliseconds.
    pub timestamp: i64,
}

impl StressReport {
    /// Create a report.
    pub fn new(answers: [i32; STRESS_REPORT_ANSWERS], timestamp: i64) -> Self {
        Self { answers, timestamp }
    }
}

/// One heart-rate reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeartbeatSample {
    /// Beats per minute.
    pub bpm: i32,
    /// When the reading was taken, in epoch milliseconds.
    pub timestamp: i64,
}

/// Pair heart-rate readings with their timestamps by position.
///
/// # Errors
///
/// Returns [`Error::LengthMismatch`] if the slices differ in length.
pub fn pair_heartbeats(heartbeats: &[i32], timestamps: &[i64]) -> Result<Vec<HeartbeatSample>> {
    if heartbeats.len() != timestamps.len() {
        return Err(Error::LengthMismatch {
            heartbeats: heartbeats.len(),
            timestamps: timestamps.len(),
        });
    }

    Ok(heartbeats
        .iter()
        .zip(timestamps)
        .map(|(bpm, timestamp)| HeartbeatSample {
            bpm: *bpm,
            timestamp: *timestamp,
        })
        .collect())
}

/// Contents of an upload batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchItems {
    /// Stress surveys.
    Reports(Vec<StressReport>),
    /// Heart-rate readings.
    Heartbeats(Vec<HeartbeatSample>),
}

impl BatchItems {
    /// Number of records in the batch.
    pub fn len(&self) -> usize {
        match self {
            Self::Reports(r) => r.len(),
            Self::Heartbeats(h) => h.len(),
        }
    }

    /// Whether the batch has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A batch submitted for one user. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadBatch {
    user: String,
    items: BatchItems,
    api_key: String,
}

impl UploadBatch {
    /// Build a batch of stress reports.
    pub fn reports(
        user: impl Into<String>,
        reports: Vec<StressReport>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            items: BatchItems::Reports(reports),
            api_key: api_key.into(),
        }
    }

    /// Build a batch of heart-rate readings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LengthMismatch`] if readings and timestamps differ in length.
    pub fn heartbeats(
        user: impl Into<String>,
        heartbeats: &[i32],
        timestamps: &[i64],
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            user: user.into(),
            items: BatchItems::Heartbeats(pair_heartbeats(heartbeats, timestamps)?),
            api_key: api_key.into(),
        })
    }

    /// User the batch belongs to.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Batch contents.
    pub fn items(&self) -> &BatchItems {
        &self.items
    }

    /// API key sent with the batch.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// How the service classified an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// Negative code.
    Rejected,
    /// Zero.
    Accepted,
    /// Positive code: accepted, and the service asks for a survey.
    FollowUp,
}

/// Result of an upload call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Outcome code returned by the service.
    pub code: i32,
    /// Time at which the service wants a new survey, if it sent one.
    pub request_time: Option<i64>,
}

impl UploadOutcome {
    /// Classify the outcome code.
    pub fn kind(&self) -> OutcomeKind {
        match self.code {
            c if c < 0 => OutcomeKind::Rejected,
            0 => OutcomeKind::Accepted,
            _ => OutcomeKind::FollowUp,
        }
    }

    /// Whether the service took the batch.
    pub fn is_accepted(&self) -> bool {
        self.code >= 0
    }

    /// Suggested survey time when the service requests a follow-up report.
    pub fn follow_up(&self) -> Option<i64> {
        match self.kind() {
            OutcomeKind::FollowUp => Some(self.request_time.unwrap_or_default()),
            _ => None,
        }
    }
}

impl From<ServiceResponse> for UploadOutcome {
    fn from(response: ServiceResponse) -> Self {
        Self {
            code: response.response,
            request_time: response.requesttime,
        }
    }
}

/// A user known to the collection service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Service-side user identifier.
    #[serde(rename = "userid")]
    pub user_id: String,
    /// Display name.
    #[serde(rename = "username")]
    pub user_name: String,
}

// ==========================================================================
// Wire records
// ==========================================================================

/// Stress report as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReportRecord {
    pub q1: i32,
    pub q2: i32,
    pub q3: i32,
    pub q4: i32,
    pub q5: i32,
    pub q6: i32,
    pub q7: i32,
    pub timestamp: i64,
}

impl From<&StressReport> for StressReportRecord {
    fn from(report: &StressReport) -> Self {
        let [q1, q2, q3, q4, q5, q6, q7] = report.answers;
        Self {
            q1,
            q2,
            q3,
            q4,
            q5,
            q6,
            q7,
            timestamp: report.timestamp,
        }
    }
}

impl From<StressReportRecord> for StressReport {
    fn from(record: StressReportRecord) -> Self {
        Self {
            answers: [
                record.q1, record.q2, record.q3, record.q4, record.q5, record.q6, record.q7,
            ],
            timestamp: record.timestamp,
        }
    }
}

/// Session timer expiry notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RanOutOfTimeRequest {
    pub apikey: String,
    pub user: String,
}

/// Request for the user list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllUsersRequest {
    pub apikey: String,
}

/// User list response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllUsersResponse {
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

/// Stress report upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressReportsRequest {
    pub apikey: String,
    pub user: String,
    pub reports: Vec<StressReportRecord>,
}

impl StressReportsRequest {
    /// Build the request for a batch. Heart-rate batches yield `None`.
    pub fn from_batch(batch: &UploadBatch) -> Option<Self> {
        match batch.items() {
            BatchItems::Reports(reports) => Some(Self {
                apikey: batch.api_key().to_string(),
                user: batch.user().to_string(),
                reports: reports.iter().map(StressReportRecord::from).collect(),
            }),
            BatchItems::Heartbeats(_) => None,
        }
    }

    /// Decode the reports carried by this request, in order.
    pub fn into_reports(self) -> Vec<StressReport> {
        self.reports.into_iter().map(StressReport::from).collect()
    }
}

/// Heart-rate upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRatesRequest {
    pub apikey: String,
    pub user: String,
    pub heartrates: Vec<i32>,
    pub timestamps: Vec<i64>,
}

impl HeartRatesRequest {
    /// Build the request for a batch. Report batches yield `None`.
    pub fn from_batch(batch: &UploadBatch) -> Option<Self> {
        match batch.items() {
            BatchItems::Heartbeats(samples) => Some(Self {
                apikey: batch.api_key().to_string(),
                user: batch.user().to_string(),
                heartrates: samples.iter().map(|s| s.bpm).collect(),
                timestamps: samples.iter().map(|s| s.timestamp).collect(),
            }),
            BatchItems::Reports(_) => None,
        }
    }
}

/// Generic service response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResponse {
    /// Outcome code.
    pub response: i32,
    /// Requested survey time accompanying a positive code.
    #[serde(default)]
    pub requesttime: Option<i64>,
}

impl ServiceResponse {
    /// A response with the given code and no request time.
    pub fn code(response: i32) -> Self {
        Self {
            response,
            requesttime: None,
        }
    }
}
