//! App customization (preview settings).
//!
//! The customization of an app lists the JavaScript and CSS resources
//! loaded on desktop and mobile. Uploaded file keys become permanent once
//! attached here; the keys read back are the ones to download.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cybozu::client::CybozuClient;
use crate::cybozu::file::FileKey;
use crate::cybozu::GuestSpaceId;
use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Kintone application id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u64);

impl std::fmt::Display for AppId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who the customization applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CustomizeScope {
    #[default]
    All,
    Admin,
    None,
}

/// Reference to an uploaded file inside a customization request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    pub file_key: FileKey,
}

/// A resource to attach: an uploaded file or an external URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CustomizeResource {
    File { file: FileRef },
    Url { url: String },
}

impl CustomizeResource {
    pub fn file(file_key: FileKey) -> Self {
        CustomizeResource::File {
            file: FileRef { file_key },
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        CustomizeResource::Url { url: url.into() }
    }
}

/// Details of an attached file as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub file_key: FileKey,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content_type: String,
    /// Byte size, sent as a decimal string.
    #[serde(default)]
    pub size: String,
}

impl FileInfo {
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.parse().ok()
    }
}

/// A resource as read back from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum CustomizeEntry {
    File { file: FileInfo },
    Url { url: String },
}

impl CustomizeEntry {
    pub fn file_key(&self) -> Option<&FileKey> {
        match self {
            CustomizeEntry::File { file } => Some(&file.file_key),
            CustomizeEntry::Url { .. } => None,
        }
    }
}

/// JavaScript and CSS resources for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Platform<T> {
    #[serde(default)]
    pub js: Vec<T>,
    #[serde(default)]
    pub css: Vec<T>,
}

impl<T> Default for Platform<T> {
    fn default() -> Self {
        Self {
            js: Vec::new(),
            css: Vec::new(),
        }
    }
}

/// New customization for an app. Replaces the whole preview setting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomizeRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<CustomizeScope>,
    pub desktop: Platform<CustomizeResource>,
    pub mobile: Platform<CustomizeResource>,
}

impl CustomizeRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Desktop JavaScript only, the common case.
    pub fn with_desktop_js(resources: impl IntoIterator<Item = CustomizeResource>) -> Self {
        let mut request = Self::new();
        request.desktop.js.extend(resources);
        request
    }

    pub fn scope(mut self, scope: CustomizeScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn desktop_js(mut self, resource: CustomizeResource) -> Self {
        self.desktop.js.push(resource);
        self
    }

    pub fn desktop_css(mut self, resource: CustomizeResource) -> Self {
        self.desktop.css.push(resource);
        self
    }

    pub fn mobile_js(mut self, resource: CustomizeResource) -> Self {
        self.mobile.js.push(resource);
        self
    }

    pub fn mobile_css(mut self, resource: CustomizeResource) -> Self {
        self.mobile.css.push(resource);
        self
    }
}

/// Current preview customization of an app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CustomizeSettings {
    pub scope: CustomizeScope,
    pub desktop: Platform<CustomizeEntry>,
    pub mobile: Platform<CustomizeEntry>,
    pub revision: String,
}

impl CustomizeSettings {
    /// Keys of the desktop JavaScript files, in load order.
    pub fn desktop_js_file_keys(&self) -> Vec<FileKey> {
        self.desktop
            .js
            .iter()
            .filter_map(CustomizeEntry::file_key)
            .cloned()
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct WirePutCustomize<'a> {
    app: AppId,
    #[serde(flatten)]
    request: &'a CustomizeRequest,
}

#[derive(Debug, Deserialize)]
struct WireRevision {
    revision: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// CustomizeClient
// ─────────────────────────────────────────────────────────────────────────────

/// Customization operations bound to one client.
#[derive(Clone)]
pub struct CustomizeClient {
    client: CybozuClient,
}

impl CustomizeClient {
    pub fn new(client: CybozuClient) -> Self {
        Self { client }
    }

    /// Replaces the preview customization of `app` and returns the new
    /// revision.
    pub async fn put_customize(
        &self,
        app: AppId,
        request: &CustomizeRequest,
        guest: Option<GuestSpaceId>,
    ) -> Result<String, AppError> {
        let url = self.client.kintone_url("preview/app/customize", guest)?;
        let body = WirePutCustomize { app, request };
        let response = self
            .client
            .send(self.client.request(Method::PUT, url).json(&body))
            .await?;

        let wire: WireRevision = response.json().await.map_err(|e| {
            AppError::transfer(format!(
                "Failed to parse customize response: {}",
                e.without_url()
            ))
        })?;

        info!(
            "[CUSTOMIZE] app {} updated ({} desktop js), revision {}",
            app,
            request.desktop.js.len(),
            wire.revision
        );
        Ok(wire.revision)
    }

    /// Reads the preview customization of `app`.
    pub async fn get_customize(
        &self,
        app: AppId,
        guest: Option<GuestSpaceId>,
    ) -> Result<CustomizeSettings, AppError> {
        let url = self.client.kintone_url("preview/app/customize", guest)?;
        let builder = self
            .client
            .request(Method::GET, url)
            .query(&[("app", app.0)]);
        let response = self.client.send(builder).await?;

        response.json().await.map_err(|e| {
            AppError::transfer(format!(
                "Failed to parse customize settings: {}",
                e.without_url()
            ))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
