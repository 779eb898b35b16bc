use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

/// Meta key holding extra API parameters for every query of a request.
pub const EXTRA_META_KEY: &str = "extra";

/// Page types the extraction API knows how to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PageType {
    Article,
    ArticleList,
    Comments,
    ForumPosts,
    JobPosting,
    Product,
    ProductList,
    RealEstate,
    Reviews,
    Vehicle,
}

impl PageType {
    pub const ALL: [PageType; 10] = [
        PageType::Article,
        PageType::ArticleList,
        PageType::Comments,
        PageType::ForumPosts,
        PageType::JobPosting,
        PageType::Product,
        PageType::ProductList,
        PageType::RealEstate,
        PageType::Reviews,
        PageType::Vehicle,
    ];

    /// The `pageType` value sent to the API, which is also the key of the
    /// extracted data in its response.
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Article => "article",
            PageType::ArticleList => "articleList",
            PageType::Comments => "comments",
            PageType::ForumPosts => "forumPosts",
            PageType::JobPosting => "jobPosting",
            PageType::Product => "product",
            PageType::ProductList => "productList",
            PageType::RealEstate => "realEstate",
            PageType::Reviews => "reviews",
            PageType::Vehicle => "vehicle",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageType::ALL
            .into_iter()
            .find(|pt| pt.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown page type: {s}"))
    }
}

/// What a caller wants back for a crawl request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    /// Structured data for a page type.
    Data(PageType),
    /// The full page markup, obtained alongside some structured request.
    Html,
}

/// A request coming from the crawler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    /// Opaque metadata carried along by the crawler.
    #[serde(default)]
    pub meta: BTreeMap<String, Value>,
}

impl CrawlRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            meta: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    /// Extra API parameters from `meta["extra"]`.
    ///
    /// A missing or null entry means none; anything but an object is
    /// rejected.
    pub fn extra(&self) -> Result<Option<&Map<String, Value>>, AppError> {
        match self.meta.get(EXTRA_META_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(extra)) => Ok(Some(extra)),
            Some(other) => Err(AppError::ConfigError(format!(
                "Invalid type for \"{EXTRA_META_KEY}\" meta of {}: expected an object, got {other}",
                self.url
            ))),
        }
    }
}

/// One outbound query to the extraction API.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub url: String,
    pub page_type: PageType,
    pub article_body_raw: bool,
    /// Extra API parameters (e.g. `fullHtml`).
    pub extra: Map<String, Value>,
}

impl Query {
    pub fn new(url: impl Into<String>, page_type: PageType) -> Self {
        Self {
            url: url.into(),
            page_type,
            article_body_raw: false,
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Merge caller supplied parameters.
    ///
    /// `url` and `pageType` always come from the query itself; a boolean
    /// `articleBodyRaw` sets [`article_body_raw`](Self::article_body_raw).
    pub fn with_extras(mut self, extras: &Map<String, Value>) -> Self {
        for (key, value) in extras {
            match (key.as_str(), value) {
                ("url" | "pageType", _) => {}
                ("articleBodyRaw", Value::Bool(raw)) => self.article_body_raw = *raw,
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        self
    }

    /// The JSON object sent to the API for this query.
    pub fn to_value(&self) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("url".into(), Value::String(self.url.clone()));
        obj.insert("pageType".into(), Value::String(self.page_type.as_str().into()));
        obj.insert("articleBodyRaw".into(), Value::Bool(self.article_body_raw));
        Value::Object(obj)
    }
}

/// Structured data returned for one page type.
///
/// `data` is the raw API result with the `html` field removed, so it is
/// keyed by page type: `{"article": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedData {
    pub page_type: PageType,
    pub data: Value,
}

/// Full page markup returned as a side effect of a structured query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HtmlPage {
    pub url: String,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Output {
    Data(ExtractedData),
    Html(HtmlPage),
}

/// Attempt counters accumulated by a transport during one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    pub n_attempts: u64,
    pub n_billable_query_responses: u64,
}
