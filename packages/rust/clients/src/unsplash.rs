//! Unsplash photo search.

use async_trait::async_trait;
use feedpress_shared::{ImagesConfig, Result, read_secret};
use serde::Deserialize;
use tracing::debug;

use crate::Failure;

const IMAGE_TIMEOUT_SECS: u64 = 30;

/// The best photo for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageHit {
    pub id: String,
    /// Download URL.
    pub url: String,
    pub photographer: String,
    /// Credit line to print next to the photo.
    pub attribution: String,
}

/// An image-search service.
#[async_trait]
pub trait ImageSearch: Send + Sync {
    /// First landscape result for `query`, if any.
    async fn search(&self, query: &str) -> Result<Option<ImageHit>>;

    /// Fetch the image bytes for a hit.
    async fn download(&self, hit: &ImageHit) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    id: String,
    urls: PhotoUrls,
    user: PhotoUser,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: String,
}

#[derive(Debug, Deserialize)]
struct PhotoUser {
    name: String,
}

pub struct UnsplashClient {
    http: reqwest::Client,
    access_key: String,
    base_url: String,
}

impl UnsplashClient {
    pub fn new(access_key: &str, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: crate::build_http(IMAGE_TIMEOUT_SECS)?,
            access_key: access_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client with the key read from `config.access_key_env`.
    pub fn from_config(config: &ImagesConfig) -> Result<Self> {
        let key = read_secret(&config.access_key_env)?;
        Self::new(&key, &config.base_url)
    }
}

#[async_trait]
impl ImageSearch for UnsplashClient {
    async fn search(&self, query: &str) -> Result<Option<ImageHit>> {
        let url = format!("{}/search/photos", self.base_url);
        debug!(query, "image search");

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.access_key))
            .header("Accept-Version", "v1")
            .query(&[
                ("query", query),
                ("per_page", "1"),
                ("orientation", "landscape"),
            ])
            .send()
            .await
            .map_err(|e| Failure::Generation.from_send("image search", e))?;
        let response = Failure::Generation.check("image search", response).await?;
        let body: SearchResponse = Failure::Generation.json("image search", response).await?;

        Ok(body.results.into_iter().next().map(|photo| ImageHit {
            attribution: format!("Photo by {} on Unsplash", photo.user.name),
            id: photo.id,
            url: photo.urls.regular,
            photographer: photo.user.name,
        }))
    }

    async fn download(&self, hit: &ImageHit) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(&hit.url)
            .send()
            .await
            .map_err(|e| Failure::Generation.from_send("image download", e))?;
        let response = Failure::Generation.check("image download", response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Failure::Generation.from_send("image download", e))?;
        Ok(bytes.to_vec())
    }
}
