use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::DocumentConfig;
use crate::errors::ServiceError;

/// Location of an uploaded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub url: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredDocument, ServiceError>;
}

pub type SharedDocumentStore = Arc<dyn DocumentStore>;

/// Writes documents to a local directory that the HTTP server also serves.
#[derive(Debug, Clone)]
pub struct LocalDocumentStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDocumentStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &DocumentConfig) -> Self {
        Self::new(&config.storage_dir, config.public_base_url.clone())
    }

    fn file_name(name: &str) -> Result<&str, ServiceError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if valid {
            Ok(name)
        } else {
            Err(ServiceError::InternalError(format!(
                "invalid document name: {}",
                name
            )))
        }
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<StoredDocument, ServiceError> {
        let file_name = Self::file_name(name)?;

        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("document storage unavailable: {}", e))
        })?;
        let path = self.root.join(file_name);
        tokio::fs::write(&path, bytes).await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("failed to store document: {}", e))
        })?;
        debug!(path = %path.display(), "document stored");

        Ok(StoredDocument {
            url: format!("{}/{}", self.public_base_url, file_name),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn upload_writes_file_and_returns_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path().join("invoices"), "http://cdn.test/invoices/");

        let stored = store
            .upload(b"invoice".to_vec(), "invoice-txn_1.txt")
            .await
            .unwrap();

        assert_eq!(stored.url, "http://cdn.test/invoices/invoice-txn_1.txt");
        let written = std::fs::read(dir.path().join("invoices/invoice-txn_1.txt")).unwrap();
        assert_eq!(written, b"invoice");
    }

    #[tokio::test]
    async fn path_traversal_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalDocumentStore::new(dir.path(), "http://cdn.test");

        assert_matches!(
            store.upload(Vec::new(), "../escape.txt").await,
            Err(ServiceError::InternalError(_))
        );
    }
}
