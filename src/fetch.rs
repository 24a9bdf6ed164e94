use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{MatchaError, Result};
use crate::extract::PageDocument;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Loads job pages so the CLI can run the extractor outside a browser.
pub struct PageFetcher {
    client: reqwest::blocking::Client,
}

impl PageFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| MatchaError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    pub fn fetch(&self, url: &str) -> Result<PageDocument> {
        info!(url, "fetching page");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| MatchaError::extraction(format!("failed to load {}: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MatchaError::extraction(format!(
                "{} answered with status {}",
                url, status
            )));
        }

        // Redirects land on the final URL, which is what the page "is".
        let final_url = response.url().to_string();
        let html = response
            .text()
            .map_err(|e| MatchaError::extraction(format!("failed to read {}: {}", url, e)))?;
        debug!(bytes = html.len(), %final_url, "page loaded");
        PageDocument::parse(&html, &final_url)
    }
}

/// Read a saved HTML file. `url` is the address the page was saved from;
/// without one the file's own `file://` URL is used.
pub fn load_file(path: &Path, url: Option<&str>) -> Result<PageDocument> {
    let html = std::fs::read_to_string(path)?;
    let url = match url {
        Some(url) => url.to_string(),
        None => {
            let absolute = std::fs::canonicalize(path)?;
            reqwest::Url::from_file_path(&absolute)
                .map_err(|_| MatchaError::extraction(format!("invalid file path {}", path.display())))?
                .to_string()
        }
    };
    PageDocument::parse(&html, &url)
}
