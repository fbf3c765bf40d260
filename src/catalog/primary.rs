//! The primary catalog: filtered listing through a JSON search expression.

use serde_json::json;

use super::item::{format_iso, MapItem};
use super::CatalogApi;

pub struct PrimaryCatalog {
    base_url: String,
}

impl PrimaryCatalog {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn search_filter(since: i64, difficulties: Option<&[String]>) -> serde_json::Value {
        let mut clauses = vec![
            json!({ "published_at": { "$gt": format_iso(since) } }),
            json!({ "beat_saber_convert": { "$ne": true } }),
        ];
        if let Some(wanted) = difficulties {
            clauses.push(json!({ "difficulties": { "$jsonContainsAny": wanted } }));
        }
        json!({ "$and": clauses })
    }
}

impl CatalogApi for PrimaryCatalog {
    fn name(&self) -> &str {
        "primary"
    }

    fn page_url(
        &self,
        page_size: usize,
        page_index: u32,
        since: i64,
        difficulties: Option<&[String]>,
    ) -> String {
        let filter = Self::search_filter(since, difficulties).to_string();
        format!(
            "{}/api/beatmaps?sort=published_at,DESC&limit={}&page={}&s={}",
            self.base_url,
            page_size,
            page_index,
            urlencoding::encode(&filter)
        )
    }

    fn download_url_for(&self, item: &MapItem) -> Option<String> {
        let path = item.download_url.as_deref()?.trim();
        if path.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.base_url, path))
    }
}
