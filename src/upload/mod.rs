//! Upload pipeline for surveys and heart-rate data.
//!
//! [`UploadPipeline`] drives the work; [`UploadService`], [`ConnectivityProbe`]
//! and [`DataCollector`] are the seams it calls through.

pub mod collector;
pub mod connectivity;
pub mod model;
pub mod pipeline;
pub mod service;

pub use collector::DataCollector;
pub use connectivity::{ConnectivityProbe, TcpReachability};
pub use model::{
    HeartbeatSample, OutcomeKind, StressReport, UploadBatch, UploadOutcome, UserRecord,
};
pub use pipeline::{SkipReason, UploadAttempt, UploadPipeline, UploadTask};
pub use service::{HttpUploadService, UploadService};
