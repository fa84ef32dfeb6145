use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use log::{info, warn};
use reqwest::blocking::Client;

use crate::error::{Result, ScraperError};

/// Remote tabular store keyed by sheet tab. Row indices are 1-based and
/// include the header row, matching how spreadsheets address cells.
pub trait RemoteTable {
    fn read_all(&self, tab: &str) -> Result<Vec<Vec<String>>>;
    fn append_rows(&mut self, tab: &str, rows: &[Vec<String>]) -> Result<()>;
    fn update_row(&mut self, tab: &str, sheet_row: usize, values: &[String]) -> Result<()>;
}

/// Blocking client for a Google-Sheets-style values API.
pub struct SheetsClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl SheetsClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.base_url,
            urlencoding::encode(range)
        )
    }

    fn send(&self, req: reqwest::blocking::RequestBuilder) -> Result<serde_json::Value> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(ScraperError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json()?)
    }
}

impl RemoteTable for SheetsClient {
    fn read_all(&self, tab: &str) -> Result<Vec<Vec<String>>> {
        let body = self.send(self.client.get(self.values_url(tab)))?;

        let mut rows = Vec::new();
        if let Some(values) = body.get("values").and_then(|v| v.as_array()) {
            for value_row in values {
                let Some(cells) = value_row.as_array() else {
                    continue;
                };
                rows.push(
                    cells
                        .iter()
                        .map(|c| match c {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                );
            }
        }
        Ok(rows)
    }

    fn append_rows(&mut self, tab: &str, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let url = format!("{}:append?valueInputOption=RAW", self.values_url(tab));
        let body = serde_json::json!({ "values": rows });
        self.send(self.client.post(url).json(&body))?;
        Ok(())
    }

    fn update_row(&mut self, tab: &str, sheet_row: usize, values: &[String]) -> Result<()> {
        let range = format!("{tab}!A{sheet_row}");
        let url = format!("{}?valueInputOption=RAW", self.values_url(&range));
        let body = serde_json::json!({ "values": [values] });
        self.send(self.client.put(url).json(&body))?;
        Ok(())
    }
}

/// Nickname -> tag labels, read from the `Tags` tab: each header cell is a
/// tag label and the cells below it are the nicknames carrying it.
#[derive(Debug, Default)]
pub struct TagBook {
    map: HashMap<String, BTreeSet<String>>,
}

impl TagBook {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn load(table: &dyn RemoteTable, tab: &str) -> Self {
        let rows = match table.read_all(tab) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Tags tab '{tab}' unavailable, continuing without tags: {e}");
                return Self::empty();
            }
        };
        if rows.is_empty() {
            return Self::empty();
        }

        let mut map: HashMap<String, BTreeSet<String>> = HashMap::new();
        let headers = &rows[0];
        for (col, header) in headers.iter().enumerate() {
            let label = header.trim();
            if label.is_empty() {
                continue;
            }
            for row in &rows[1..] {
                let Some(cell) = row.get(col) else { continue };
                let nickname = cell.trim();
                if !nickname.is_empty() {
                    map.entry(nickname.to_string())
                        .or_default()
                        .insert(label.to_string());
                }
            }
        }

        info!("Loaded tags for {} user(s) from '{tab}'", map.len());
        TagBook { map }
    }

    pub fn tags_for(&self, nickname: &str) -> BTreeSet<String> {
        self.map.get(nickname).cloned().unwrap_or_default()
    }
}

/// In-memory table used by tests in place of the HTTP client.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct InMemoryTable {
    pub tabs: HashMap<String, Vec<Vec<String>>>,
}

#[cfg(test)]
impl InMemoryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, tab: &str) -> &[Vec<String>] {
        self.tabs.get(tab).map(|r| r.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
impl RemoteTable for InMemoryTable {
    fn read_all(&self, tab: &str) -> Result<Vec<Vec<String>>> {
        Ok(self.tabs.get(tab).cloned().unwrap_or_default())
    }

    fn append_rows(&mut self, tab: &str, rows: &[Vec<String>]) -> Result<()> {
        self.tabs
            .entry(tab.to_string())
            .or_default()
            .extend(rows.iter().cloned());
        Ok(())
    }

    fn update_row(&mut self, tab: &str, sheet_row: usize, values: &[String]) -> Result<()> {
        let rows = self.tabs.entry(tab.to_string()).or_default();
        if sheet_row == 0 || sheet_row > rows.len() {
            return Err(ScraperError::Remote {
                status: 400,
                message: format!("row {sheet_row} out of range"),
            });
        }
        rows[sheet_row - 1] = values.to_vec();
        Ok(())
    }
}
