use reqwest::Url;

use crate::db::ChildUrls;

/// URL templates for the PSGC catalog, all hanging off one base URL.
#[derive(Debug, Clone)]
pub struct Catalog {
    base: String,
}

impl Catalog {
    pub fn new(base_url: &str) -> Self {
        Catalog {
            base: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Listing of every region; the only URL not derived from a stored record.
    pub fn seed(&self) -> String {
        format!("{}/?q=psgc/regions", self.base)
    }

    pub fn provinces(&self, code: &str) -> String {
        format!("{}/?q=psgc/provinces/{}", self.base, code)
    }

    pub fn citimuni(&self, code: &str) -> String {
        format!("{}/?q=psgc/citimuni/{}", self.base, code)
    }

    pub fn barangays(&self, code: &str) -> String {
        format!("{}/?q=psgc/barangays/{}", self.base, code)
    }

    pub fn children(&self, code: &str) -> ChildUrls {
        ChildUrls {
            provinces: self.provinces(code),
            citimuni: self.citimuni(code),
            barangays: self.barangays(code),
        }
    }
}

/// Resolve a pager href against the page it was read from.
pub fn resolve(page_url: &str, href: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    base.join(href.trim()).ok().map(String::from)
}
