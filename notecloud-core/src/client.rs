use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.notecloud.app";

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api rejected the request: {message}")]
    Rejected { message: String },
    #[error("upload succeeded but the response carried no file url")]
    MissingUrl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CloudClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CloudError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Fetches the authenticated account's profile. A 401/403 means the
    /// stored token is no longer valid.
    pub async fn get_profile(&self) -> Result<Profile, CloudError> {
        let url = self.endpoint("/v1/account/profile")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Fetches the account's stored sync document. `Ok(None)` means the
    /// account has no document yet (first sync from this account).
    pub async fn load_blob(&self) -> Result<Option<Value>, CloudError> {
        let url = self.endpoint("/v1/account/storage")?;
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let envelope: StorageEnvelope = Self::handle_response(response).await?;
        if !envelope.success {
            return Ok(None);
        }
        Ok(envelope.data)
    }

    /// Replaces the account's stored sync document with `document`.
    pub async fn save_blob(&self, document: &Value) -> Result<(), CloudError> {
        let url = self.endpoint("/v1/account/storage")?;
        let response = self
            .http
            .put(url)
            .header("Authorization", self.auth_header_value())
            .json(document)
            .send()
            .await?;
        let ack: AckEnvelope = Self::handle_response(response).await?;
        if !ack.success {
            return Err(CloudError::Rejected {
                message: ack.message.unwrap_or_else(|| "save refused".to_string()),
            });
        }
        Ok(())
    }

    /// Stores a binary and returns a durable fetch URL for it.
    pub async fn upload_file(&self, content: Vec<u8>, filename: &str) -> Result<Url, CloudError> {
        let mut url = self.endpoint("/v1/account/storage/files")?;
        url.query_pairs_mut().append_pair("filename", filename);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .header("Content-Type", "application/octet-stream")
            .body(content)
            .send()
            .await?;
        let envelope: UploadEnvelope = Self::handle_response(response).await?;
        if !envelope.success {
            return Err(CloudError::Rejected {
                message: envelope
                    .message
                    .unwrap_or_else(|| "upload refused".to_string()),
            });
        }
        envelope.url.ok_or(CloudError::MissingUrl)
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, CloudError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(CloudError::Api { status, body })
        }
    }
}

impl CloudError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CloudError::Api { status, .. } => Some(classify_api_status(*status)),
            CloudError::Rejected { .. } => Some(ApiErrorClass::Permanent),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct AckEnvelope {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    success: bool,
    #[serde(default)]
    url: Option<Url>,
    #[serde(default)]
    message: Option<String>,
}
