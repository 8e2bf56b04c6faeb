use anyhow::{anyhow, Result};
use serde_json::{json, Value};

use super::applier::SheetsApi;
use super::SheetDirectory;
use crate::model::SheetConfig;
use crate::sync::cloud::transport_error;

const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";
const DRIVE_BASE_URL: &str = "https://www.googleapis.com";

/// Spreadsheet REST port over the Sheets v4 / Drive v3 endpoints.
pub struct HttpSheetsApi {
    client: reqwest::blocking::Client,
    sheets_base_url: String,
    drive_base_url: String,
}

impl HttpSheetsApi {
    pub fn new() -> Result<Self> {
        Self::with_base_urls(SHEETS_BASE_URL, DRIVE_BASE_URL)
    }

    pub fn with_base_urls(sheets_base_url: &str, drive_base_url: &str) -> Result<Self> {
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
            sheets_base_url: sheets_base_url.trim_end_matches('/').to_string(),
            drive_base_url: drive_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn get_json(&self, token: &str, url: &str, context: &str) -> Result<Value> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .map_err(|e| transport_error(context, e))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("{context} failed: HTTP {status} {text}"));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn post_json(&self, token: &str, url: &str, body: &Value, context: &str) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .map_err(|e| transport_error(context, e))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("{context} failed: HTTP {status} {text}"));
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

impl SheetsApi for HttpSheetsApi {
    fn sheet_titles(&self, token: &str, spreadsheet_id: &str) -> Result<Vec<String>> {
        let url = format!(
            "{}/v4/spreadsheets/{spreadsheet_id}?fields=sheets.properties.title",
            self.sheets_base_url
        );
        let meta = self.get_json(token, &url, "get spreadsheet")?;
        let titles = meta["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s["properties"]["title"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(titles)
    }

    fn add_sheet(&self, token: &str, spreadsheet_id: &str, title: &str) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{spreadsheet_id}:batchUpdate",
            self.sheets_base_url
        );
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": title } } }]
        });
        self.post_json(token, &url, &body, "add sheet")?;
        Ok(())
    }

    fn values_get(
        &self,
        token: &str,
        spreadsheet_id: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{}/v4/spreadsheets/{spreadsheet_id}/values/{range}",
            self.sheets_base_url
        );
        let body = self.get_json(token, &url, "values get")?;
        let rows = body["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| {
                                cells
                                    .iter()
                                    .map(|cell| match cell {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    })
                                    .collect()
                            })
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    fn values_update(
        &self,
        token: &str,
        spreadsheet_id: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<()> {
        let url = format!(
            "{}/v4/spreadsheets/{spreadsheet_id}/values/{range}?valueInputOption=RAW",
            self.sheets_base_url
        );
        let body = json!({
            "range": range,
            "majorDimension": "ROWS",
            "values": values,
        });
        let resp = self
            .client
            .put(url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .map_err(|e| transport_error("values update", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("values update failed: HTTP {status} {text}"));
        }
        Ok(())
    }

    fn create_spreadsheet(&self, token: &str, title: &str) -> Result<String> {
        let url = format!("{}/v4/spreadsheets", self.sheets_base_url);
        let body = json!({ "properties": { "title": title } });
        let created = self.post_json(token, &url, &body, "create spreadsheet")?;
        created["spreadsheetId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("create spreadsheet returned no id"))
    }

    fn find_spreadsheet_by_title(&self, token: &str, title: &str) -> Result<Option<String>> {
        let escaped = title.replace('\'', "\\'");
        let query = format!(
            "name = '{escaped}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false"
        );
        let mut url = reqwest::Url::parse(&format!("{}/drive/v3/files", self.drive_base_url))?;
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)")
            .append_pair("pageSize", "10");
        let body = self.get_json(token, url.as_str(), "drive search")?;
        Ok(body["files"]
            .as_array()
            .and_then(|files| files.first())
            .and_then(|file| file["id"].as_str())
            .map(str::to_string))
    }
}

/// Destination directory backed by the cloud store's REST surface. The
/// provider token (for the spreadsheet API) is handed in by the auth layer;
/// when it is absent every flush aborts silently.
pub struct HttpSheetDirectory {
    client: reqwest::blocking::Client,
    base_url: String,
    auth_token: String,
    provider_token: Option<String>,
}

impl HttpSheetDirectory {
    pub fn new(base_url: &str, auth_token: &str, provider_token: Option<String>) -> Result<Self> {
        let base = base_url.trim_end_matches('/');
        if base.is_empty() {
            return Err(anyhow!("missing sheet directory base url"));
        }
        Ok(Self {
            client: reqwest::blocking::Client::builder().build()?,
            base_url: base.to_string(),
            auth_token: auth_token.to_string(),
            provider_token,
        })
    }

    fn list(&self, path: &str, context: &str) -> Result<Vec<SheetConfig>> {
        let resp = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .map_err(|e| transport_error(context, e))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(anyhow!("{context} failed: HTTP {status} {text}"));
        }
        let configs: Vec<SheetConfig> = serde_json::from_str(&text)?;
        Ok(configs)
    }

    /// Links (or updates) a destination in the cloud directory.
    pub fn upsert_destination(&self, config: &SheetConfig) -> Result<()> {
        let resp = self
            .client
            .put(format!("{}/v1/sheets/{}", self.base_url, config.id))
            .bearer_auth(&self.auth_token)
            .json(config)
            .send()
            .map_err(|e| transport_error("sheet link", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("sheet link failed: HTTP {status} {text}"));
        }
        Ok(())
    }

    pub fn delete_destination(&self, id: &str) -> Result<()> {
        let resp = self
            .client
            .delete(format!("{}/v1/sheets/{id}", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .map_err(|e| transport_error("sheet unlink", e))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(anyhow!("sheet unlink failed: HTTP {status} {text}"));
        }
        Ok(())
    }
}

impl SheetDirectory for HttpSheetDirectory {
    fn access_token(&self) -> Result<Option<String>> {
        Ok(self.provider_token.clone())
    }

    fn sheet_destinations(&self) -> Result<Vec<SheetConfig>> {
        self.list("/v1/sheets", "sheet list")
    }

    fn journal_destinations(&self) -> Result<Vec<SheetConfig>> {
        self.list("/v1/journal-sheets", "journal sheet list")
    }
}
