//! Remote collection service client.
//!
//! [`UploadService`] is the seam the pipeline talks to. [`HttpUploadService`]
//! implements it as JSON over HTTP:
//!
//! | Operation            | Path             | Body                     | Response             |
//! |----------------------|------------------|--------------------------|----------------------|
//! | session expired      | `/outoftime`     | [`RanOutOfTimeRequest`]  | [`ServiceResponse`]  |
//! | list users           | `/getallusers`   | [`AllUsersRequest`]      | [`AllUsersResponse`] |
//! | upload surveys       | `/newreports`    | [`StressReportsRequest`] | [`ServiceResponse`]  |
//! | upload heart rates   | `/newheartrates` | [`HeartRatesRequest`]    | [`ServiceResponse`]  |

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace};

use super::model::{
    AllUsersRequest, AllUsersResponse, HeartRatesRequest, RanOutOfTimeRequest, ServiceResponse,
    StressReportsRequest, UploadBatch, UserRecord,
};
use crate::config::UploadConfig;
use crate::error::{Error, Result};

/// Remote operations offered by the collection service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Tell the service the user's session timer expired.
    async fn out_of_time(&self, api_key: &str, user: &str) -> Result<ServiceResponse>;

    /// Fetch every user the service knows about.
    async fn get_all_users(&self, api_key: &str) -> Result<Vec<UserRecord>>;

    /// Submit a batch of stress surveys.
    async fn new_reports(&self, batch: &UploadBatch) -> Result<ServiceResponse>;

    /// Submit a batch of heart-rate readings.
    async fn new_heart_rates(&self, batch: &UploadBatch) -> Result<ServiceResponse>;

    /// Release the transport. Later calls fail.
    fn close(&self);
}

/// JSON-over-HTTP client for the collection service.
///
/// The underlying HTTP client is built on first use and then shared by all
/// calls made through this instance until [`close`](UploadService::close).
#[derive(Debug)]
pub struct HttpUploadService {
    base_url: String,
    config: UploadConfig,
    client: Mutex<ClientSlot>,
}

#[derive(Debug)]
enum ClientSlot {
    Unbuilt,
    Ready(Client),
    Closed,
}

impl HttpUploadService {
    /// Create a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: UploadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            base_url: config.base_url(),
            config,
            client: Mutex::new(ClientSlot::Unbuilt),
        })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the transport has been released.
    pub fn is_closed(&self) -> bool {
        matches!(*self.client.lock(), ClientSlot::Closed)
    }

    fn client(&self) -> Result<Client> {
        let mut slot = self.client.lock();
        if let ClientSlot::Ready(client) = &*slot {
            return Ok(client.clone());
        }
        if matches!(*slot, ClientSlot::Closed) {
            return Err(Error::Transport(format!(
                "connection to {} closed",
                self.base_url
            )));
        }

        debug!("Building HTTP client for {}", self.base_url);
        let client = Client::builder()
            .timeout(self.config.request_timeout())
            .build()
            .map_err(Error::Http)?;
        *slot = ClientSlot::Ready(client.clone());
        Ok(client)
    }

    async fn post_json<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        trace!("POST {}", url);

        let response = self
            .client()?
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status.is_success() {
            response.json().await.map_err(Error::Http)
        } else {
            Err(Error::Transport(format!("{} returned {}", url, status)))
        }
    }
}

#[async_trait]
impl UploadService for HttpUploadService {
    async fn out_of_time(&self, api_key: &str, user: &str) -> Result<ServiceResponse> {
        let request = RanOutOfTimeRequest {
            apikey: api_key.to_string(),
            user: user.to_string(),
        };
        self.post_json("/outoftime", &request).await
    }

    async fn get_all_users(&self, api_key: &str) -> Result<Vec<UserRecord>> {
        let request = AllUsersRequest {
            apikey: api_key.to_string(),
        };
        let response: AllUsersResponse = self.post_json("/getallusers", &request).await?;
        Ok(response.users)
    }

    async fn new_reports(&self, batch: &UploadBatch) -> Result<ServiceResponse> {
        let request = StressReportsRequest::from_batch(batch).ok_or_else(|| {
            Error::InvalidParameter {
                name: "batch".to_string(),
                value: "heart rates sent as reports".to_string(),
            }
        })?;
        self.post_json("/newreports", &request).await
    }

    async fn new_heart_rates(&self, batch: &UploadBatch) -> Result<ServiceResponse> {
        let request = HeartRatesRequest::from_batch(batch).ok_or_else(|| {
            Error::InvalidParameter {
                name: "batch".to_string(),
                value: "reports sent as heart rates".to_string(),
            }
        })?;
        self.post_json("/newheartrates", &request).await
    }

    fn close(&self) {
        let previous = std::mem::replace(&mut *self.client.lock(), ClientSlot::Closed);
        if matches!(previous, ClientSlot::Ready(_)) {
            debug!("Released HTTP client for {}", self.base_url);
        }
    }
}
