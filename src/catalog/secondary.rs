//! The secondary catalog: plain query parameters, relative download paths.

use super::item::{format_plain, MapItem};
use super::CatalogApi;

pub struct SecondaryCatalog {
    base_url: String,
}

impl SecondaryCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl CatalogApi for SecondaryCatalog {
    fn name(&self) -> &str {
        "secondary"
    }

    fn page_url(
        &self,
        page_size: usize,
        page_index: u32,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> String {
        let mut url = format!(
            "{}/beatmaps?sort=published_at,DESC&limit={}&page={}&date_after={}",
            self.base_url,
            page_size,
            page_index,
            format_plain(since)
        );

        if let Some(wanted) = difficulties.filter(|d| !d.is_empty()) {
            let joined = wanted
                .iter()
                .map(|d| d.to_lowercase())
                .collect::<Vec<_>>()
                .join(",");
            url.push_str("&difficulties=");
            url.push_str(&joined);
        }
        url
    }

    fn download_url_for(&self, item: &MapItem) -> Option<String> {
        let path = item.download_url.as_deref()?.trim();
        if path.is_empty() {
            return None;
        }
        Some(format!("{}/{}", self.base_url, path.trim_start_matches('/')))
    }
}
