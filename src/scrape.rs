//! Store-locator scraper.
//!
//! For every configured store site, searches the site's locator for a
//! location in headless Chromium and prints the result page to an A4 PDF
//! under the output directory. A failing store is logged and skipped.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::element::Element;
use chromiumoxide::page::Page;
use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::config::{Config, ScraperConfig};
use crate::models::StoreSite;

/// Store locators visited by `llmaps scrape`.
pub const STORES: &[StoreSite] = &[
    StoreSite {
        name: "ralphs",
        url: "https://www.ralphs.com/stores/search",
        search_id: "SearchBar-input",
    },
    StoreSite {
        name: "vons",
        url: "https://local.vons.com/",
        search_id: "store-search-input",
    },
];

const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.7;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Renders a store site's search result for a location as PDF bytes.
#[async_trait]
pub trait PageCapture: Send + Sync {
    async fn capture(&self, site: &StoreSite, location: &str) -> Result<Vec<u8>>;
}

/// `"La Jolla, CA"` → `"la_jolla_ca"`.
pub fn location_slug(location: &str) -> String {
    location.replace(' ', "_").replace(',', "").to_lowercase()
}

/// `{store}_{slug}_{YYYYmmdd_HHMMSS}.pdf`
pub fn pdf_file_name(store: &str, location: &str, at: &chrono::NaiveDateTime) -> String {
    format!(
        "{}_{}_{}.pdf",
        store,
        location_slug(location),
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Outcome of a scrape run.
#[derive(Debug, Default)]
pub struct ScrapeReport {
    pub saved: Vec<PathBuf>,
    /// `(store name, error)` for every store that was skipped.
    pub failed: Vec<(String, String)>,
}

/// Capture every site in `sites` and write the PDFs to `output_dir`.
pub async fn scrape_all(
    capture: &dyn PageCapture,
    sites: &[StoreSite],
    location: &str,
    output_dir: &Path,
) -> ScrapeReport {
    let mut report = ScrapeReport::default();

    for site in sites {
        tracing::info!(store = site.name, location, "saving store page");
        match scrape_one(capture, site, location, output_dir).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "saved PDF");
                report.saved.push(path);
            }
            Err(e) => {
                tracing::error!(store = site.name, "error saving page: {:#}", e);
                report.failed.push((site.name.to_string(), format!("{:#}", e)));
            }
        }
    }

    report
}

async fn scrape_one(
    capture: &dyn PageCapture,
    site: &StoreSite,
    location: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    let pdf = capture.capture(site, location).await?;

    let name = pdf_file_name(site.name, location, &chrono::Local::now().naive_local());
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let path = output_dir.join(name);
    std::fs::write(&path, pdf).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

// ============ Chromium ============

/// [`PageCapture`] backed by a headless Chromium over the DevTools protocol.
pub struct ChromeCapture {
    browser: Browser,
    handler: JoinHandle<()>,
    settle: Duration,
    element_timeout: Duration,
}

impl ChromeCapture {
    pub async fn launch(config: &ScraperConfig) -> Result<Self> {
        let browser_config = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .build()
            .map_err(|e| anyhow::anyhow!("invalid browser config: {}", e))?;

        let (browser, mut events) = Browser::launch(browser_config)
            .await
            .context("failed to launch Chromium")?;

        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            settle: Duration::from_secs(config.settle_secs),
            element_timeout: Duration::from_secs(config.element_timeout_secs),
        })
    }

    pub async fn close(mut self) -> Result<()> {
        self.browser.close().await?;
        self.browser.wait().await?;
        self.handler.abort();
        Ok(())
    }

    async fn wait_for_element(&self, page: &Page, id: &str) -> Result<Element> {
        let selector = format!("#{}", id);
        let deadline = Instant::now() + self.element_timeout;
        loop {
            match page.find_element(selector.as_str()).await {
                Ok(element) => return Ok(element),
                Err(_) if Instant::now() < deadline => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => bail!(
                    "element {} not found within {}s: {}",
                    selector,
                    self.element_timeout.as_secs(),
                    e
                ),
            }
        }
    }

    async fn search_and_print(&self, page: &Page, site: &StoreSite, location: &str) -> Result<Vec<u8>> {
        let input = self.wait_for_element(page, site.search_id).await?;
        input
            .call_js_fn("function() { this.value = ''; }", false)
            .await?;
        input.click().await?;
        input.type_str(location).await?;
        input.press_key("Enter").await?;

        tokio::time::sleep(self.settle).await;

        let params = PrintToPdfParams {
            print_background: Some(true),
            paper_width: Some(A4_WIDTH_IN),
            paper_height: Some(A4_HEIGHT_IN),
            ..Default::default()
        };
        Ok(page.pdf(params).await?)
    }
}

#[async_trait]
impl PageCapture for ChromeCapture {
    async fn capture(&self, site: &StoreSite, location: &str) -> Result<Vec<u8>> {
        let page = self
            .browser
            .new_page(site.url)
            .await
            .with_context(|| format!("failed to open {}", site.url))?;

        let result = self.search_and_print(&page, site, location).await;
        if let Err(e) = page.close().await {
            tracing::debug!("failed to close page: {}", e);
        }
        result
    }
}

/// `llmaps scrape LOCATION`.
pub async fn run_scrape(config: &Config, location: &str) -> Result<()> {
    let capture = ChromeCapture::launch(&config.scraper).await?;
    let report = scrape_all(&capture, STORES, location, &config.scraper.output_dir).await;
    if let Err(e) = capture.close().await {
        tracing::warn!("failed to close browser: {:#}", e);
    }

    for path in &report.saved {
        println!("Saved PDF to {}", path.display());
    }
    for (store, err) in &report.failed {
        println!("Error saving {} page: {}", store, err);
    }
    println!("\nFinished saving store pages for {}", location);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Returns fake PDF bytes, failing for the stores listed in `broken`.
    struct FakeCapture {
        broken: Vec<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PageCapture for FakeCapture {
        async fn capture(&self, site: &StoreSite, location: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}:{}", site.name, location));
            if self.broken.contains(&site.name) {
                bail!("element #{} not found", site.search_id);
            }
            Ok(format!("%PDF {}", site.name).into_bytes())
        }
    }

    #[test]
    fn test_location_slug() {
        assert_eq!(location_slug("La Jolla, CA"), "la_jolla_ca");
        assert_eq!(location_slug("92037"), "92037");
    }

    #[test]
    fn test_pdf_file_name() {
        let at = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 7)
            .unwrap();
        assert_eq!(
            pdf_file_name("ralphs", "La Jolla, CA", &at),
            "ralphs_la_jolla_ca_20240309_140507.pdf"
        );
    }

    #[test]
    fn test_configured_stores() {
        let names: Vec<&str> = STORES.iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["ralphs", "vons"]);
        assert_eq!(STORES[0].search_id, "SearchBar-input");
        assert_eq!(STORES[1].url, "https://local.vons.com/");
    }

    #[tokio::test]
    async fn test_failing_store_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("raw-documents");
        let capture = FakeCapture {
            broken: vec!["ralphs"],
            calls: Mutex::new(Vec::new()),
        };

        let report = scrape_all(&capture, STORES, "La Jolla, CA", &out).await;

        assert_eq!(
            *capture.calls.lock().unwrap(),
            vec!["ralphs:La Jolla, CA", "vons:La Jolla, CA"]
        );
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "ralphs");
        assert_eq!(report.saved.len(), 1);

        let saved = &report.saved[0];
        let name = saved.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("vons_la_jolla_ca_"));
        assert!(name.ends_with(".pdf"));
        assert_eq!(std::fs::read(saved).unwrap(), b"%PDF vons");
    }

    #[tokio::test]
    async fn test_unwritable_output_dir_is_per_store_failure() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let capture = FakeCapture {
            broken: vec![],
            calls: Mutex::new(Vec::new()),
        };

        let report = scrape_all(&capture, STORES, "92037", &blocker.join("out")).await;
        assert!(report.saved.is_empty());
        assert_eq!(report.failed.len(), 2);
    }
}
