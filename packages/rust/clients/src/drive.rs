//! Google Drive v3 client: dated image folders and public JPEG uploads.

use async_trait::async_trait;
use feedpress_shared::{DriveConfig, FeedpressError, Result, read_secret};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::Failure;

const DRIVE_TIMEOUT_SECS: u64 = 60;
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Where uploaded images are stored and served from.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Find or create a publicly readable folder named `name`. Returns its id.
    async fn ensure_folder(&self, name: &str) -> Result<String>;

    /// Upload a JPEG into `folder_id` and make it public. Returns its public URL.
    async fn upload_jpeg(&self, folder_id: &str, name: &str, bytes: Vec<u8>) -> Result<String>;
}

/// Direct-view URL for a publicly shared Drive file.
pub fn public_image_url(file_id: &str) -> String {
    format!("https://drive.google.com/uc?export=view&id={file_id}")
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileRef>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    id: String,
}

pub struct GoogleDriveClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
    upload_url: String,
}

impl GoogleDriveClient {
    pub fn new(token: &str, base_url: &str, upload_url: &str) -> Result<Self> {
        Ok(Self {
            http: crate::build_http(DRIVE_TIMEOUT_SECS)?,
            token: token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            upload_url: upload_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client with the token read from `config.token_env`.
    pub fn from_config(config: &DriveConfig) -> Result<Self> {
        let token = read_secret(&config.token_env)?;
        Self::new(&token, &config.base_url, &config.upload_url)
    }

    async fn share_publicly(&self, file_id: &str) -> Result<()> {
        let url = format!("{}/files/{file_id}/permissions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&json!({"type": "anyone", "role": "reader"}))
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("share file", e))?;
        Failure::Publish.check("share file", response).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageHost for GoogleDriveClient {
    async fn ensure_folder(&self, name: &str) -> Result<String> {
        let query = format!(
            "name='{}' and mimeType='{FOLDER_MIME}' and trashed=false",
            name.replace('\'', "\\'")
        );
        let response = self
            .http
            .get(format!("{}/files", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("q", query.as_str()), ("fields", "files(id,name)")])
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("find folder", e))?;
        let response = Failure::Publish.check("find folder", response).await?;
        let list: FileList = Failure::Publish.json("find folder", response).await?;

        if let Some(existing) = list.files.into_iter().next() {
            debug!(folder = name, id = %existing.id, "using existing image folder");
            return Ok(existing.id);
        }

        let response = self
            .http
            .post(format!("{}/files", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("fields", "id")])
            .json(&json!({"name": name, "mimeType": FOLDER_MIME}))
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("create folder", e))?;
        let response = Failure::Publish.check("create folder", response).await?;
        let folder: FileRef = Failure::Publish.json("create folder", response).await?;

        self.share_publicly(&folder.id).await?;
        info!(folder = name, id = %folder.id, "created and shared image folder");
        Ok(folder.id)
    }

    async fn upload_jpeg(&self, folder_id: &str, name: &str, bytes: Vec<u8>) -> Result<String> {
        if bytes.is_empty() {
            return Err(FeedpressError::publish(format!("refusing to upload empty image {name}")));
        }

        let response = self
            .http
            .post(format!("{}/files", self.upload_url))
            .bearer_auth(&self.token)
            .query(&[("uploadType", "media"), ("fields", "id")])
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(bytes)
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("upload image", e))?;
        let response = Failure::Publish.check("upload image", response).await?;
        let file: FileRef = Failure::Publish.json("upload image", response).await?;

        let response = self
            .http
            .patch(format!("{}/files/{}", self.base_url, file.id))
            .bearer_auth(&self.token)
            .query(&[("addParents", folder_id), ("fields", "id")])
            .json(&json!({"name": name}))
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("file image", e))?;
        Failure::Publish.check("file image", response).await?;

        self.share_publicly(&file.id).await?;
        debug!(name, id = %file.id, "uploaded image");
        Ok(public_image_url(&file.id))
    }
}
