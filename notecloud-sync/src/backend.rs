use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use notecloud_core::{CloudClient, CloudError};

use crate::model::RemoteDocument;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cloud api error: {0}")]
    Cloud(#[from] CloudError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub id: String,
}

/// Result of fetching the account's stored document. `data: None` means the
/// account has no document yet.
#[derive(Debug, Clone, Default)]
pub struct BlobLoad {
    pub data: Option<Value>,
}

/// The capability set the sync engine needs from the account backend. The
/// orchestrator is generic over this so tests run against in-memory doubles.
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// `None` when the session is unauthenticated or has no known account id.
    async fn account(&self) -> Option<AccountInfo>;

    /// Portable deployments never touch cloud persistence.
    async fn is_portable_deployment(&self) -> bool;

    async fn load_blob(&self) -> Result<BlobLoad, BackendError>;

    async fn save_blob(&self, document: &RemoteDocument) -> Result<(), BackendError>;

    /// Stores a binary and returns a durable fetch URL.
    async fn upload_file(&self, content: Vec<u8>, filename: &str) -> Result<String, BackendError>;
}

/// Session context binding the HTTP client to one signed-in account.
pub struct CloudSession {
    client: CloudClient,
    portable: bool,
}

impl CloudSession {
    pub fn new(client: CloudClient, portable: bool) -> Self {
        Self { client, portable }
    }
}

#[async_trait]
impl SyncBackend for CloudSession {
    async fn account(&self) -> Option<AccountInfo> {
        let profile = self.client.get_profile().await.ok()?;
        if profile.id.is_empty() {
            return None;
        }
        Some(AccountInfo { id: profile.id })
    }

    async fn is_portable_deployment(&self) -> bool {
        self.portable
    }

    async fn load_blob(&self) -> Result<BlobLoad, BackendError> {
        let data = self.client.load_blob().await?;
        Ok(BlobLoad { data })
    }

    async fn save_blob(&self, document: &RemoteDocument) -> Result<(), BackendError> {
        let value = serde_json::to_value(document)?;
        self.client.save_blob(&value).await?;
        Ok(())
    }

    async fn upload_file(&self, content: Vec<u8>, filename: &str) -> Result<String, BackendError> {
        let url = self.client.upload_file(content, filename).await?;
        Ok(url.to_string())
    }
}
