//! Wiki page text collection for external keyword extraction.
//!
//! Pages are fetched through a file cache keyed by the SHA-256 of the URL.
//! Cached text is used as-is with no expiry. A page that cannot be fetched
//! contributes empty text; the batch always completes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use thiserror::Error;
use ureq::Agent;

use crate::config::WikiConfig;

static BODY_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr").unwrap());
static TH_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());
static TD_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td").unwrap());

/// HTTP statuses worth retrying.
const RETRYABLE: &[u16] = &[429, 500, 502, 503, 504];

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(#[from] ureq::Error),
    #[error("cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache file name for a URL: hex SHA-256.
pub fn cache_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// Whitespace-joined visible text of an HTML document.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let words: Vec<&str> = match doc.select(&BODY_SELECTOR).next() {
        Some(body) => body.text().flat_map(str::split_whitespace).collect(),
        None => doc.root_element().text().flat_map(str::split_whitespace).collect(),
    };
    words.join(" ")
}

/// Values of every table row whose header cell reads `label`, joined with "；".
pub fn labeled_row_text(html: &str, label: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let values: Vec<String> = doc
        .select(&ROW_SELECTOR)
        .filter(|row| {
            row.select(&TH_SELECTOR)
                .next()
                .is_some_and(|th| th.text().collect::<String>().trim() == label)
        })
        .flat_map(|row| {
            row.select(&TD_SELECTOR)
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect::<Vec<_>>()
        })
        .filter(|v| !v.is_empty())
        .collect();
    (!values.is_empty()).then(|| values.join("；"))
}

/// Page URLs for one cleaned character name: base + name + each suffix.
pub fn page_urls(base_url: &str, name: &str, suffixes: &[String]) -> Vec<String> {
    let encoded = urlencoding::encode(name);
    suffixes
        .iter()
        .map(|suffix| {
            let suffix: String = suffix
                .split('/')
                .map(|seg| urlencoding::encode(seg).into_owned())
                .collect::<Vec<_>>()
                .join("/");
            format!("{base_url}{encoded}{suffix}")
        })
        .collect()
}

pub struct WikiClient {
    agent: Agent,
    cache_dir: PathBuf,
    retries: u32,
    backoff: Duration,
    user_agent: String,
    label: Option<String>,
}

impl WikiClient {
    pub fn new(config: &WikiConfig, cache_dir: PathBuf) -> Self {
        let agent_config = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .build();
        Self {
            agent: Agent::new_with_config(agent_config),
            cache_dir,
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            user_agent: config.user_agent.clone(),
            label: config.infobox_label.clone(),
        }
    }

    fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.txt", cache_key(url)))
    }

    /// Cached text for `url`, fetching on a miss. Failures yield "".
    pub fn fetch_text(&self, url: &str) -> String {
        let path = self.cache_path(url);
        if let Ok(text) = std::fs::read_to_string(&path) {
            log::debug!("Cache hit for {url}");
            return text;
        }
        match self.fetch_and_cache(url, &path) {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Failed to fetch {url}: {e}");
                String::new()
            }
        }
    }

    fn fetch_and_cache(&self, url: &str, path: &Path) -> Result<String, FetchError> {
        let html = self.fetch_with_retry(url)?;
        let text = match &self.label {
            Some(label) => labeled_row_text(&html, label).unwrap_or_default(),
            None => html_to_text(&html),
        };
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::write(path, &text)?;
        Ok(text)
    }

    fn fetch_with_retry(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            let err = match self.fetch_once(url) {
                Ok(body) => return Ok(body),
                Err(e) => e,
            };
            let retryable = match &err {
                FetchError::Status(code) => RETRYABLE.contains(code),
                FetchError::Transport(_) => true,
                FetchError::Io(_) => false,
            };
            if !retryable || attempt >= self.retries {
                return Err(err);
            }
            let wait = self.backoff * 2u32.saturating_pow(attempt);
            log::debug!("{url}: {err}; retry {} in {:?}", attempt + 1, wait);
            thread::sleep(wait);
            attempt += 1;
        }
    }

    fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        log::debug!("Fetching {url}");
        match self.agent.get(url).header("User-Agent", &self.user_agent).call() {
            Ok(mut response) => Ok(response.body_mut().read_to_string()?),
            Err(ureq::Error::StatusCode(code)) => Err(FetchError::Status(code)),
            Err(e) => Err(FetchError::Transport(e)),
        }
    }
}

/// Summary of a collection run.
#[derive(Debug, Default)]
pub struct CollectResult {
    pub texts: BTreeMap<String, String>,
    pub pages: usize,
    pub empty_pages: usize,
    pub skipped: usize,
}

/// Fetch every page of every name and combine per name.
/// `names` are already cleaned; names in the config skip list are ignored.
pub fn collect_texts(client: &WikiClient, names: &[String], config: &WikiConfig) -> CollectResult {
    let mut result = CollectResult::default();
    let todo: Vec<&String> = names
        .iter()
        .filter(|n| {
            let skip = config.skip.iter().any(|s| s == *n);
            if skip {
                result.skipped += 1;
            }
            !skip
        })
        .collect();

    let pb = ProgressBar::new(todo.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} characters ({eta} remaining) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );

    for name in todo {
        pb.set_message(name.clone());
        let texts: Vec<String> = page_urls(&config.base_url, name, &config.suffixes)
            .iter()
            .map(|url| client.fetch_text(url))
            .collect();
        result.pages += texts.len();
        result.empty_pages += texts.iter().filter(|t| t.is_empty()).count();

        let combined = texts.iter().filter(|t| !t.is_empty()).cloned().collect::<Vec<_>>().join(" ");
        result.texts.insert(name.clone(), combined);
        pb.inc(1);
    }

    pb.finish_with_message("done");
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> WikiConfig {
        WikiConfig {
            base_url: "http://127.0.0.1:9/".into(),
            suffixes: vec!["/二次设定".into(), "/".into()],
            retries: 0,
            timeout_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_cache_key_is_stable_hex() {
        let k = cache_key("https://thbwiki.cc/琪露诺/");
        assert_eq!(k.len(), 64);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(k, cache_key("https://thbwiki.cc/琪露诺/"));
        assert_ne!(k, cache_key("https://thbwiki.cc/琪露诺/二次设定"));
    }

    #[test]
    fn test_page_urls_encode_segments() {
        let urls = page_urls("https://thbwiki.cc/", "琪露诺", &config().suffixes);
        assert_eq!(urls.len(), 2);
        assert!(urls[0].starts_with("https://thbwiki.cc/%E7%90%AA"));
        assert!(urls[0].contains("/%E4%BA%8C"));
        assert!(urls[1].ends_with('/'));
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>t</title></head><body><p>冰之 妖精</p>\n<div>  ⑨ </div></body></html>";
        assert_eq!(html_to_text(html), "冰之 妖精 ⑨");
    }

    #[test]
    fn test_labeled_row_text() {
        let html = r#"<div itemscope class="infotemplatebox"><table>
            <tr><th>萌点</th><td>笨蛋</td><td>冰</td></tr>
            <tr><th>种族</th><td>妖精</td></tr>
        </table></div>"#;
        assert_eq!(labeled_row_text(html, "萌点").as_deref(), Some("笨蛋；冰"));
        assert_eq!(labeled_row_text(html, "能力"), None);
    }

    #[test]
    fn test_fetch_text_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let client = WikiClient::new(&config(), dir.path().to_path_buf());
        let url = "http://127.0.0.1:9/琪露诺/";
        std::fs::write(client.cache_path(url), "cached text").unwrap();
        assert_eq!(client.fetch_text(url), "cached text");
    }

    #[test]
    fn test_collect_skips_and_combines() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = WikiConfig { skip: vec!["蕾拉·普莉兹姆利巴".into()], ..config() };
        let client = WikiClient::new(&cfg, dir.path().to_path_buf());
        for (i, url) in page_urls(&cfg.base_url, "琪露诺", &cfg.suffixes).iter().enumerate() {
            std::fs::write(client.cache_path(url), format!("page{i}")).unwrap();
        }
        let names = vec!["琪露诺".to_string(), "蕾拉·普莉兹姆利巴".to_string()];
        let result = collect_texts(&client, &names, &cfg);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.texts["琪露诺"], "page0 page1");
        assert_eq!(result.empty_pages, 0);
    }
}
