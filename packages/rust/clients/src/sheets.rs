//! Google Sheets v4 client (values + batchUpdate).

use async_trait::async_trait;
use feedpress_shared::{FeedpressError, Result, SheetsConfig, read_secret};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::Failure;

const SHEETS_TIMEOUT_SECS: u64 = 30;

/// The spreadsheet operations the publisher needs.
#[async_trait]
pub trait SpreadsheetApi: Send + Sync {
    /// Titles of all tabs.
    async fn list_tabs(&self) -> Result<Vec<String>>;

    async fn add_tab(&self, title: &str) -> Result<()>;

    /// Every used cell of `column` (e.g. `"A"`) in `tab`, top to bottom.
    /// Empty trailing cells are not returned; empty cells in between are `""`.
    async fn read_column(&self, tab: &str, column: &str) -> Result<Vec<String>>;

    /// Overwrite row `row` (1-based) of `tab`, starting at column A.
    async fn write_row(&self, tab: &str, row: usize, cells: &[String]) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

pub struct GoogleSheetsClient {
    http: reqwest::Client,
    token: String,
    sheet_id: String,
    base_url: String,
}

impl GoogleSheetsClient {
    pub fn new(token: &str, sheet_id: &str, base_url: &str) -> Result<Self> {
        Ok(Self {
            http: crate::build_http(SHEETS_TIMEOUT_SECS)?,
            token: token.to_string(),
            sheet_id: sheet_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build a client from the env vars named in `config`.
    pub fn from_config(config: &SheetsConfig) -> Result<Self> {
        let token = read_secret(&config.token_env)?;
        let sheet_id = read_secret(&config.sheet_id_env)?;
        Self::new(&token, &sheet_id, &config.base_url)
    }

    /// `{base}/v4/spreadsheets/{id}{suffix}/{segments...}` with each segment
    /// percent-encoded.
    fn endpoint(&self, id_suffix: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FeedpressError::config(format!("invalid sheets base URL: {e}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| FeedpressError::config("sheets base URL cannot be a base"))?;
            path.pop_if_empty()
                .push("v4")
                .push("spreadsheets")
                .push(&format!("{}{id_suffix}", self.sheet_id));
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }
}

fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SpreadsheetApi for GoogleSheetsClient {
    async fn list_tabs(&self) -> Result<Vec<String>> {
        let mut url = self.endpoint("", &[])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("list tabs", e))?;
        let response = Failure::Publish.check("list tabs", response).await?;
        let meta: SpreadsheetMeta = Failure::Publish.json("list tabs", response).await?;

        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_tab(&self, title: &str) -> Result<()> {
        let url = self.endpoint(":batchUpdate", &[])?;
        let body = json!({
            "requests": [{"addSheet": {"properties": {"title": title}}}]
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("add tab", e))?;
        Failure::Publish.check("add tab", response).await?;
        debug!(tab = title, "created spreadsheet tab");
        Ok(())
    }

    async fn read_column(&self, tab: &str, column: &str) -> Result<Vec<String>> {
        let range = format!("{tab}!{column}:{column}");
        let url = self.endpoint("", &["values", &range])?;

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("read column", e))?;
        let response = Failure::Publish.check("read column", response).await?;
        let values: ValueRange = Failure::Publish.json("read column", response).await?;

        Ok(values
            .values
            .iter()
            .map(|row| row.first().map(cell_to_string).unwrap_or_default())
            .collect())
    }

    async fn write_row(&self, tab: &str, row: usize, cells: &[String]) -> Result<()> {
        let range = format!("{tab}!A{row}");
        let mut url = self.endpoint("", &["values", &range])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": [cells],
        });

        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::Publish.from_send("write row", e))?;
        Failure::Publish.check("write row", response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleSheetsClient {
        GoogleSheetsClient::new("tok", "sheet123", &server.uri()).unwrap()
    }

    #[tokio::test]
    async fn list_tabs_reads_titles() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet123"))
            .and(query_param("fields", "sheets.properties.title"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "sheets": [
                    {"properties": {"title": "Sheet1"}},
                    {"properties": {"title": "LinkedIn_Posts"}}
                ]
            })))
            .mount(&server)
            .await;

        let tabs = client(&server).list_tabs().await.unwrap();
        assert_eq!(tabs, vec!["Sheet1", "LinkedIn_Posts"]);
    }

    #[tokio::test]
    async fn add_tab_posts_batch_update() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/spreadsheets/sheet123:batchUpdate"))
            .and(body_partial_json(json!({
                "requests": [{"addSheet": {"properties": {"title": "Twitter_Posts"}}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"replies": [{}]})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).add_tab("Twitter_Posts").await.unwrap();
    }

    #[tokio::test]
    async fn read_column_handles_missing_values() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet123/values/LinkedIn_Posts!A:A"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "range": "LinkedIn_Posts!A1:A3",
                "values": [["ArticleId"], [], ["abc123"]]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet123/values/Twitter_Posts!A:A"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"range": "Twitter_Posts!A1:A1"})),
            )
            .mount(&server)
            .await;

        let sheets = client(&server);
        assert_eq!(
            sheets.read_column("LinkedIn_Posts", "A").await.unwrap(),
            vec!["ArticleId", "", "abc123"]
        );
        assert!(sheets.read_column("Twitter_Posts", "A").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn write_row_puts_raw_values() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v4/spreadsheets/sheet123/values/Instagram_Posts!A5"))
            .and(query_param("valueInputOption", "RAW"))
            .and(body_partial_json(json!({"values": [["abc123", "2025-03-14"]]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"updatedRows": 1})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .write_row("Instagram_Posts", 5, &["abc123".into(), "2025-03-14".into()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_is_retryable_publish_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/spreadsheets/sheet123"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server).list_tabs().await.unwrap_err();
        assert!(matches!(err, FeedpressError::Publish { .. }));
        assert!(err.is_retryable());
    }
}
