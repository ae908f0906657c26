//! Collaborator Interfaces
//!
//! Services the streaming core depends on but does not own: choosing the
//! model and pushing files into the server-side context.
//!
//! The core treats the model as an opaque required string. Where it comes
//! from is up to the [`ModelSelector`]: a fixed name from configuration
//! ([`FixedModel`]) or whatever was last picked through the server's model
//! catalog ([`HttpModelCatalog`]).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;

use crate::error::{ChatError, StreamError, ERROR_BODY_LIMIT};
use crate::transport::{collect_body, HttpRequest, Transport, TransportResponse};

/// Largest model-list response accepted
const MODEL_LIST_LIMIT: usize = 256 * 1024;

/// Supplies the model identifier for each request
pub trait ModelSelector: Send + Sync {
    /// Currently selected model, if any
    fn selected_model(&self) -> Option<String>;
}

/// A model fixed at construction time
#[derive(Clone, Debug, Default)]
pub struct FixedModel(Option<String>);

impl FixedModel {
    /// Always select `model`
    pub fn new(model: impl Into<String>) -> Self {
        Self(Some(model.into()))
    }

    /// Select nothing
    #[must_use]
    pub fn none() -> Self {
        Self(None)
    }
}

impl ModelSelector for FixedModel {
    fn selected_model(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A file to add to the server-side context
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextFile {
    /// Name shown to the server
    pub name: String,
    /// Where the file was read from, if anywhere
    pub path: Option<PathBuf>,
    /// File contents
    pub bytes: Vec<u8>,
}

impl ContextFile {
    /// Wrap in-memory contents
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            path: None,
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Upload`] if the file cannot be read.
    pub async fn read(path: impl Into<PathBuf>) -> Result<Self, ChatError> {
        let path = path.into();
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ChatError::Upload(format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self {
            name,
            path: Some(path),
            bytes,
        })
    }
}

/// Pushes files into the context of subsequent requests
///
/// A successful upload is usually followed by
/// [`ChatSession::reissue`](crate::session::ChatSession::reissue).
#[async_trait]
pub trait ContextUploader: Send + Sync {
    /// Upload `files`
    async fn upload(&self, files: &[ContextFile]) -> Result<(), ChatError>;
}

/// `{ "models": [...] }` with either bare names or `{ "name": ... }` entries
#[derive(Debug, Deserialize)]
struct ModelList {
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModelEntry {
    Name(String),
    Named { name: String },
}

impl ModelEntry {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Named { name } => name,
        }
    }
}

/// The server's model catalog, reached over the chat transport
///
/// Remembers the last selection and acts as the [`ModelSelector`].
pub struct HttpModelCatalog {
    transport: Arc<dyn Transport>,
    endpoint: String,
    selected: RwLock<Option<String>>,
}

impl HttpModelCatalog {
    /// Catalog rooted at `endpoint` (e.g. `http://localhost:8000`)
    pub fn new(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            transport,
            endpoint,
            selected: RwLock::new(None),
        }
    }

    /// Start with `model` already selected
    #[must_use]
    pub fn with_selected(self, model: Option<String>) -> Self {
        *self.selected.write() = model;
        self
    }

    /// `GET {endpoint}/models`
    ///
    /// # Errors
    ///
    /// Fails on transport errors, non-2xx responses and unexpected JSON.
    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        let url = format!("{}/models", self.endpoint);
        let response = self.transport.issue(HttpRequest::get(&url)).await?;
        let body = read_checked(response, MODEL_LIST_LIMIT).await?;
        let list: ModelList = serde_json::from_slice(&body)?;
        let models: Vec<String> = list.models.into_iter().map(ModelEntry::into_name).collect();
        tracing::debug!(count = models.len(), "Fetched model list");
        Ok(models)
    }

    /// `POST {endpoint}/model` with `{ "model": name }`
    ///
    /// # Errors
    ///
    /// Fails on transport errors and non-2xx responses; the previous
    /// selection is kept in that case.
    pub async fn select_model(&self, name: &str) -> Result<(), ChatError> {
        let url = format!("{}/model", self.endpoint);
        let request = HttpRequest::post_json(&url, &serde_json::json!({ "model": name }))?;
        let response = self.transport.issue(request).await?;
        read_checked(response, ERROR_BODY_LIMIT).await?;

        tracing::info!(model = %name, "Model selected");
        *self.selected.write() = Some(name.to_string());
        Ok(())
    }
}

impl ModelSelector for HttpModelCatalog {
    fn selected_model(&self) -> Option<String> {
        self.selected.read().clone()
    }
}

async fn read_checked(response: TransportResponse, limit: usize) -> Result<Vec<u8>, ChatError> {
    let status = response.status;
    let success = response.is_success();
    let body = match response.body {
        Some(body) => collect_body(body, limit).await?,
        None => Vec::new(),
    };

    if success {
        Ok(body)
    } else {
        let mut body = String::from_utf8_lossy(&body).into_owned();
        body.truncate(floor_char_boundary(&body, ERROR_BODY_LIMIT));
        Err(StreamError::RequestFailed { status, body }.into())
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    (0..=index).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}
