//! Helpers to build a reqwest blocking client and classify its failures.

use reqwest::blocking::Client;
use reqwest::Error as ReqwestError;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub conn_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            conn_timeout: DEFAULT_CONN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

#[derive(thiserror::Error, Debug)]
pub enum HttpBuildError {
    #[error("building http client: {0}")]
    ClientBuilder(String),
}

#[derive(thiserror::Error, Debug)]
pub enum HttpResponseError {
    /// A response arrived but carried a non-success status code.
    #[error("unsuccessful response: {status_code} - body: {body}")]
    UnsuccessfulResponse { status_code: StatusCode, body: String },

    #[error("could not decode response body: {0}")]
    DecodingResponse(String),

    #[error(
        "connection error: could not connect to the host. this is often caused by a \
         firewall, proxy, or network routing issue. original error: {0}"
    )]
    ConnectError(#[source] ReqwestError),

    #[error("timeout error: the request timed out. original error: {0}")]
    TimeoutError(#[source] ReqwestError),

    #[error(
        "dns resolution error: could not resolve the host. please check your dns \
         configuration. original error: {0}"
    )]
    DnsError(#[source] ReqwestError),

    #[error("generic transport error: {0}")]
    GenericTransportError(#[source] ReqwestError),
}

impl HttpResponseError {
    /// True for failures where the remote side could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            HttpResponseError::ConnectError(_)
                | HttpResponseError::TimeoutError(_)
                | HttpResponseError::DnsError(_)
                | HttpResponseError::GenericTransportError(_)
        )
    }
}

impl HttpClient {
    /// Builds a reqwest blocking client according to the provided configuration.
    pub fn new(config: HttpConfig) -> Result<Self, HttpBuildError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.conn_timeout)
            .build()
            .map_err(|err| HttpBuildError::ClientBuilder(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, HttpResponseError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .map_err(from_reqwest_error)?;
        decode_response(response)
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, HttpResponseError> {
        let response = self.client.get(url).send().map_err(from_reqwest_error)?;
        decode_response(response)
    }
}

fn decode_response<T: DeserializeOwned>(
    response: reqwest::blocking::Response,
) -> Result<T, HttpResponseError> {
    let status_code = response.status();
    if !status_code.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(HttpResponseError::UnsuccessfulResponse { status_code, body });
    }
    response
        .json()
        .map_err(|err| HttpResponseError::DecodingResponse(err.to_string()))
}

fn from_reqwest_error(e: ReqwestError) -> HttpResponseError {
    if e.is_connect() {
        HttpResponseError::ConnectError(e)
    } else if e.is_timeout() {
        HttpResponseError::TimeoutError(e)
    } else if (e.is_builder() || e.is_request()) && e.to_string().to_lowercase().contains("dns") {
        HttpResponseError::DnsError(e)
    } else {
        HttpResponseError::GenericTransportError(e)
    }
}
