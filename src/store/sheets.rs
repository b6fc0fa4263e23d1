//! Google Sheets result store (Sheets API v4 over REST).
//!
//! Authentication is a bearer access token supplied by the operator; this
//! module never runs an OAuth flow.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::pipeline::types::ROW_HEADER;
use crate::store::{ResultStore, RowRange};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Max characters of an error body kept in errors.
const ERROR_BODY_PREVIEW: usize = 300;

/// Row numbers of an A1 range such as `'Tickets'!A5:G7` or `Tickets!A5`.
static A1_ROWS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"![A-Za-z]+(\d+)(?::[A-Za-z]+(\d+))?$").expect("valid A1 regex")
});

/// Sheets store settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub access_token: SecretString,
    pub base_url: String,
    pub timeout: Duration,
}

// ── Wire types ──────────────────────────────────────────────────────

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

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: String,
}

/// Ignores whatever body the API returns.
#[derive(Debug, Deserialize)]
struct Ignored {}

// ── Store ───────────────────────────────────────────────────────────

/// Google Sheets-backed [`ResultStore`]; destinations are sheet tabs.
pub struct SheetsStore {
    client: reqwest::Client,
    config: SheetsConfig,
}

impl SheetsStore {
    pub fn new(config: SheetsConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| StoreError::Http(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// `{base}/spreadsheets/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.config.base_url)
            .map_err(|e| StoreError::Http(format!("invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Http("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push("spreadsheets")
            .extend(segments);
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, StoreError> {
        let response = request
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Http(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                body: body.chars().take(ERROR_BODY_PREVIEW).collect(),
            });
        }

        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body)
            .map_err(|e| StoreError::InvalidResponse(format!("undecodable body: {e}")))
    }

    async fn sheet_titles(&self) -> Result<Vec<String>, StoreError> {
        let mut url = self.url(&[self.config.spreadsheet_id.as_str()])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let meta: SpreadsheetMeta = self.send(self.client.get(url)).await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn add_sheet(&self, title: &str) -> Result<(), StoreError> {
        let url = self.url(&[format!("{}:batchUpdate", self.config.spreadsheet_id).as_str()])?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });
        let _: Ignored = self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    async fn header_present(&self, destination: &str) -> Result<bool, StoreError> {
        let range = a1_range(destination, "1:1");
        let url = self.url(&[self.config.spreadsheet_id.as_str(), "values", range.as_str()])?;
        let values: ValueRange = self.send(self.client.get(url)).await?;
        Ok(values
            .values
            .first()
            .is_some_and(|row| row.iter().any(|cell| !cell_is_blank(cell))))
    }

    async fn write_header(&self, destination: &str) -> Result<(), StoreError> {
        let range = a1_range(destination, "A1");
        let mut url = self.url(&[self.config.spreadsheet_id.as_str(), "values", range.as_str()])?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let body = json!({ "majorDimension": "ROWS", "values": [ROW_HEADER] });
        let _: Ignored = self.send(self.client.put(url).json(&body)).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for SheetsStore {
    async fn ensure_destination(&self, destination: &str) -> Result<(), StoreError> {
        let titles = self.sheet_titles().await?;
        if !titles.iter().any(|t| t == destination) {
            self.add_sheet(destination).await?;
            info!(destination, "Sheet created");
        }

        if self.header_present(destination).await? {
            debug!(destination, "Header row already present");
        } else {
            self.write_header(destination).await?;
            info!(destination, "Header row written");
        }
        Ok(())
    }

    async fn append_rows(
        &self,
        destination: &str,
        rows: &[Vec<String>],
    ) -> Result<RowRange, StoreError> {
        if rows.is_empty() {
            return Err(StoreError::EmptyAppend);
        }

        let range = a1_range(destination, "A1");
        let append_target = format!("{range}:append");
        let mut url = self.url(&[
            self.config.spreadsheet_id.as_str(),
            "values",
            append_target.as_str(),
        ])?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");

        let body = json!({ "majorDimension": "ROWS", "values": rows });
        let response: AppendResponse = self.send(self.client.post(url).json(&body)).await?;

        let written = parse_row_range(&response.updates.updated_range).ok_or_else(|| {
            StoreError::InvalidResponse(format!(
                "unexpected updatedRange '{}'",
                response.updates.updated_range
            ))
        })?;
        debug!(destination, rows = rows.len(), range = %written, "Rows appended");
        Ok(written)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Quote a sheet title for A1 notation (`'It''s'!A1`).
fn a1_range(sheet: &str, cells: &str) -> String {
    format!("'{}'!{cells}", sheet.replace('\'', "''"))
}

/// Row span of an A1 range returned by the API.
fn parse_row_range(range: &str) -> Option<RowRange> {
    let caps = A1_ROWS.captures(range.trim())?;
    let start_row: u32 = caps.get(1)?.as_str().parse().ok()?;
    let end_row: u32 = match caps.get(2) {
        Some(end) => end.as_str().parse().ok()?,
        None => start_row,
    };
    (end_row >= start_row).then_some(RowRange { start_row, end_row })
}

fn cell_is_blank(cell: &serde_json::Value) -> bool {
    match cell {
        serde_json::Value::Null => true,
        serde_json::Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn store(base_url: &str) -> SheetsStore {
        SheetsStore::new(SheetsConfig {
            spreadsheet_id: "sheet-123".into(),
            access_token: SecretString::from("ya29.test"),
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
        })
        .unwrap()
    }

    /// Matches `path` with or without a query string.
    fn path(p: &str) -> Matcher {
        Matcher::Regex(format!(r"^{}(\?.*)?$", regex::escape(p)))
    }

    async fn mock_titles(server: &mut mockito::ServerGuard, titles: &[&str]) -> mockito::Mock {
        let sheets: Vec<_> = titles
            .iter()
            .map(|t| json!({ "properties": { "title": t } }))
            .collect();
        server
            .mock("GET", path("/spreadsheets/sheet-123"))
            .match_header("authorization", "Bearer ya29.test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "sheets": sheets }).to_string())
            .create_async()
            .await
    }

    async fn mock_first_row(server: &mut mockito::ServerGuard, values: serde_json::Value) -> mockito::Mock {
        server
            .mock("GET", path("/spreadsheets/sheet-123/values/'Tickets'!1:1"))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "range": "'Tickets'!A1:Z1", "values": values }).to_string())
            .create_async()
            .await
    }

    #[tokio::test]
    async fn ensure_destination_twice_writes_header_once() {
        let mut server = mockito::Server::new_async().await;
        let _titles = mock_titles(&mut server, &["Tickets"]).await;
        let add_sheet = server
            .mock("POST", path("/spreadsheets/sheet-123:batchUpdate"))
            .expect(0)
            .create_async()
            .await;
        let put_header = server
            .mock("PUT", path("/spreadsheets/sheet-123/values/'Tickets'!A1"))
            .match_query(Matcher::UrlEncoded("valueInputOption".into(), "RAW".into()))
            .match_body(Matcher::PartialJson(json!({ "values": [ROW_HEADER] })))
            .with_status(200)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let s = store(&server.url());

        let empty = mock_first_row(&mut server, json!([])).await;
        s.ensure_destination("Tickets").await.unwrap();
        empty.remove_async().await;

        let _filled = mock_first_row(&mut server, json!([ROW_HEADER])).await;
        s.ensure_destination("Tickets").await.unwrap();

        put_header.assert_async().await;
        add_sheet.assert_async().await;
    }

    #[tokio::test]
    async fn ensure_destination_creates_missing_tab() {
        let mut server = mockito::Server::new_async().await;
        let _titles = mock_titles(&mut server, &["Archive"]).await;
        let add_sheet = server
            .mock("POST", path("/spreadsheets/sheet-123:batchUpdate"))
            .match_body(Matcher::PartialJson(json!({
                "requests": [{ "addSheet": { "properties": { "title": "Tickets" } } }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"spreadsheetId": "sheet-123", "replies": [{}]}"#)
            .expect(1)
            .create_async()
            .await;
        let _first_row = mock_first_row(&mut server, json!([])).await;
        let put_header = server
            .mock("PUT", path("/spreadsheets/sheet-123/values/'Tickets'!A1"))
            .with_status(200)
            .with_body("")
            .expect(1)
            .create_async()
            .await;

        store(&server.url()).ensure_destination("Tickets").await.unwrap();

        add_sheet.assert_async().await;
        put_header.assert_async().await;
    }

    #[tokio::test]
    async fn append_rows_returns_updated_range() {
        let mut server = mockito::Server::new_async().await;
        let rows = vec![
            vec!["1".to_string(), "Connexion".to_string()],
            vec!["2".to_string(), "Facture".to_string()],
        ];
        let append = server
            .mock("POST", path("/spreadsheets/sheet-123/values/'Tickets'!A1:append"))
            .match_header("authorization", "Bearer ya29.test")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("valueInputOption".into(), "RAW".into()),
                Matcher::UrlEncoded("insertDataOption".into(), "INSERT_ROWS".into()),
            ]))
            .match_body(Matcher::PartialJson(json!({ "values": rows })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "spreadsheetId": "sheet-123",
                    "updates": { "updatedRange": "'Tickets'!A8:G9", "updatedRows": 2 }
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let range = store(&server.url())
            .append_rows("Tickets", &rows)
            .await
            .unwrap();

        assert_eq!(range, RowRange { start_row: 8, end_row: 9 });
        append.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_keeps_status_and_body() {
        let mut server = mockito::Server::new_async().await;
        let _denied = server
            .mock("GET", path("/spreadsheets/sheet-123"))
            .with_status(403)
            .with_body(r#"{"error": {"code": 403, "message": "The caller does not have permission"}}"#)
            .create_async()
            .await;

        let err = store(&server.url())
            .ensure_destination("Tickets")
            .await
            .unwrap_err();
        match err {
            StoreError::Api { status, body } => {
                assert_eq!(status, 403);
                assert!(body.contains("permission"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parse_row_range_variants() {
        assert_eq!(
            parse_row_range("'Tickets'!A5:G7"),
            Some(RowRange { start_row: 5, end_row: 7 })
        );
        assert_eq!(
            parse_row_range("Tickets!A12:G12"),
            Some(RowRange { start_row: 12, end_row: 12 })
        );
        assert_eq!(
            parse_row_range("'Tickets'!A9"),
            Some(RowRange { start_row: 9, end_row: 9 })
        );
        assert_eq!(
            parse_row_range("'Sheet ! odd'!AA100:AG101"),
            Some(RowRange { start_row: 100, end_row: 101 })
        );
    }

    #[test]
    fn parse_row_range_rejects_garbage() {
        assert_eq!(parse_row_range(""), None);
        assert_eq!(parse_row_range("Tickets"), None);
        assert_eq!(parse_row_range("'Tickets'!A:G"), None);
        assert_eq!(parse_row_range("'Tickets'!A9:G3"), None);
    }

    #[test]
    fn a1_range_quotes_titles() {
        assert_eq!(a1_range("Tickets", "A1"), "'Tickets'!A1");
        assert_eq!(a1_range("L'équipe", "1:1"), "'L''équipe'!1:1");
    }

    #[test]
    fn url_encodes_segments() {
        let s = store("https://sheets.googleapis.com/v4/");
        let url = s
            .url(&["sheet-123", "values", a1_range("Mes tickets", "A1").as_str()])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-123/values/'Mes%20tickets'!A1"
        );
    }

    #[test]
    fn url_rejects_invalid_base() {
        let s = store("not a url");
        assert!(matches!(s.url(&["x"]), Err(StoreError::Http(_))));
    }

    #[test]
    fn append_response_decodes() {
        let body = r#"{
            "spreadsheetId": "sheet-123",
            "tableRange": "'Tickets'!A1:G4",
            "updates": {"updatedRange": "'Tickets'!A5:G6", "updatedRows": 2}
        }"#;
        let parsed: AppendResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parse_row_range(&parsed.updates.updated_range),
            Some(RowRange { start_row: 5, end_row: 6 })
        );
    }

    #[test]
    fn empty_value_range_has_no_header() {
        let parsed: ValueRange = serde_json::from_str(r#"{"range": "'Tickets'!A1:Z1"}"#).unwrap();
        assert!(parsed.values.is_empty());
        assert!(cell_is_blank(&serde_json::json!("  ")));
        assert!(!cell_is_blank(&serde_json::json!("Identifiant")));
    }

    #[test]
    fn spreadsheet_meta_lists_titles() {
        let body = r#"{"sheets": [{"properties": {"title": "Tickets"}}, {"properties": {"title": "Archive"}}]}"#;
        let meta: SpreadsheetMeta = serde_json::from_str(body).unwrap();
        let titles: Vec<_> = meta.sheets.into_iter().map(|s| s.properties.title).collect();
        assert_eq!(titles, vec!["Tickets", "Archive"]);
    }
}
