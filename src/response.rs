//! Response envelopes for list results.

use crate::service::Page;
use serde::Serialize;
use serde_json::{Map, Value};

/// Paginated list envelope. `total`/`lastPage` are omitted under simple
/// pagination; the index hint and aggregate blocks appear only when present.
#[derive(Serialize, Debug)]
pub struct PageEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_required_on_filtering: Option<Vec<String>>,
    pub items: Vec<Value>,
    #[serde(rename = "perPage")]
    pub per_page: u32,
    #[serde(rename = "currentPage")]
    pub current_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(rename = "lastPage", skip_serializing_if = "Option::is_none")]
    pub last_page: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sums: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avgs: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mins: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxs: Option<Map<String, Value>>,
}

impl PageEnvelope {
    pub fn from_page(page: Page) -> Self {
        let per_page = page.per_page;
        let last_page = page
            .total
            .map(|total| (total.div_ceil(per_page.max(1) as u64)).max(1));
        Self {
            index_required_on_filtering: None,
            items: page.items.into_iter().map(|i| i.into_value()).collect(),
            per_page,
            current_page: page.current_page,
            total: page.total,
            last_page,
            sums: None,
            avgs: None,
            mins: None,
            maxs: None,
        }
    }

    /// The degrade-to-empty policy: any list failure renders this envelope
    /// instead of an error.
    pub fn empty(per_page: u32) -> Self {
        Self {
            index_required_on_filtering: None,
            items: Vec::new(),
            per_page,
            current_page: 1,
            total: Some(0),
            last_page: None,
            sums: None,
            avgs: None,
            mins: None,
            maxs: None,
        }
    }
}
