use crate::controller::http::{HttpBuildError, HttpClient, HttpConfig, HttpResponseError};
use crate::controller::messages::{
    Ack, AssignmentBatch, HeartbeatRequest, RegisterRequest,
};
use crate::supervisor::update::ProcessCategory;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ControllerError {
    /// The controller could not be reached; local operation continues and
    /// registration is retried with backoff.
    #[error("controller unreachable: {0}")]
    Unreachable(String),

    /// The controller answered with a non-success status.
    #[error("controller rejected the request: {0}")]
    Rejected(String),

    #[error("invalid controller response: {0}")]
    InvalidResponse(String),

    #[error("invalid controller endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Build(#[from] HttpBuildError),
}

impl From<HttpResponseError> for ControllerError {
    fn from(err: HttpResponseError) -> Self {
        match err {
            HttpResponseError::UnsuccessfulResponse { .. } => {
                ControllerError::Rejected(err.to_string())
            }
            HttpResponseError::DecodingResponse(msg) => ControllerError::InvalidResponse(msg),
            other => ControllerError::Unreachable(other.to_string()),
        }
    }
}

impl ControllerError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ControllerError::Unreachable(_))
    }
}

/// Blocking client for the controller's launcher-facing API.
#[derive(Debug, Clone)]
pub struct ControllerClient {
    http: HttpClient,
    endpoint: Url,
    launcher_id: String,
}

impl ControllerClient {
    pub fn new(
        endpoint: Url,
        launcher_id: String,
        http_config: HttpConfig,
    ) -> Result<Self, ControllerError> {
        Ok(Self {
            http: HttpClient::new(http_config)?,
            endpoint,
            launcher_id,
        })
    }

    pub fn launcher_id(&self) -> &str {
        &self.launcher_id
    }

    /// Announces this launcher to the controller. Called at startup and
    /// again after every connection loss.
    pub fn register(
        &self,
        capacity: u32,
        capabilities: &[ProcessCategory],
    ) -> Result<(), ControllerError> {
        let request = RegisterRequest {
            launcher_id: self.launcher_id.clone(),
            capacity,
            capabilities: capabilities.to_vec(),
        };
        let _: Ack = self.http.post_json(self.url(&["launchers"])?, &request)?;
        Ok(())
    }

    /// Fire-and-forget status report; a failed heartbeat never changes
    /// local state.
    pub fn heartbeat(&self, request: &HeartbeatRequest) -> Result<(), ControllerError> {
        let url = self.url(&["launchers", &self.launcher_id, "heartbeat"])?;
        let _: Ack = self.http.post_json(url, request)?;
        Ok(())
    }

    /// Fetches pending assignments and revocations past `cursor`.
    pub fn poll_assignments(&self, cursor: u64) -> Result<AssignmentBatch, ControllerError> {
        let mut url = self.url(&["launchers", &self.launcher_id, "assignments"])?;
        url.query_pairs_mut().append_pair("cursor", &cursor.to_string());
        Ok(self.http.get_json(url)?)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ControllerError> {
        let mut url = self.endpoint.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ControllerError::InvalidEndpoint("endpoint cannot be a base".into()))?;
            path.pop_if_empty().push("v1");
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}
