use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::USER_AGENT;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com/";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub base_url: Option<String>,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SortOption {
    Hot,
    New,
    Top,
    Rising,
    Relevance,
    Comments,
}

impl Default for SortOption {
    fn default() -> Self {
        SortOption::Hot
    }
}

impl SortOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOption::Hot => "hot",
            SortOption::New => "new",
            SortOption::Top => "top",
            SortOption::Rising => "rising",
            SortOption::Relevance => "relevance",
            SortOption::Comments => "comments",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SortOption::Hot => "Hot",
            SortOption::New => "New",
            SortOption::Top => "Top",
            SortOption::Rising => "Rising",
            SortOption::Relevance => "Relevance",
            SortOption::Comments => "Comments",
        }
    }

    pub fn from_key(key: &str) -> SortOption {
        match key {
            "new" => SortOption::New,
            "top" => SortOption::Top,
            "rising" => SortOption::Rising,
            "relevance" => SortOption::Relevance,
            "comments" => SortOption::Comments,
            _ => SortOption::Hot,
        }
    }
}

/// One listing request: subreddit plus sort, optional search text, and the
/// continuation cursor from the previous page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListingQuery {
    pub subreddit: String,
    pub sort: SortOption,
    pub search: String,
    pub after: Option<String>,
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("reddit client user agent required");
        }
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(&base)?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(DEFAULT_TIMEOUT))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn listing(&self, query: &ListingQuery) -> Result<Listing<Post>> {
        let url = listing_url(&self.base_url, query)?;
        let resp = self.get(url)?;
        let envelope: ListingEnvelope<Post> = resp.json()?;
        Ok(envelope.data)
    }

    fn get(&self, url: Url) -> Result<Response> {
        let resp = self
            .http
            .get(url)
            .header(USER_AGENT, self.user_agent.clone())
            .send()?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().unwrap_or_default();
            match status.as_u16() {
                403 => Err(anyhow!("reddit: forbidden")),
                404 => Err(anyhow!("reddit: subreddit not found")),
                429 => Err(anyhow!("reddit: rate limited: {}", body)),
                _ => Err(anyhow!("reddit: api error {}: {}", status, body)),
            }
        }
    }
}

/// Builds the request URL for a query. An empty search targets the
/// subreddit's listing endpoint for the sort; a non-empty search targets the
/// subreddit-restricted search endpoint with the sort as the search order.
/// The `after` parameter is always present, empty when no cursor is held.
pub fn listing_url(base: &Url, query: &ListingQuery) -> Result<Url> {
    let subreddit = query
        .subreddit
        .trim()
        .trim_start_matches("r/")
        .trim_start_matches('/');
    if subreddit.is_empty() {
        bail!("reddit: subreddit required");
    }

    let after = query.after.clone().unwrap_or_default();
    let search = query.search.trim();

    let mut url;
    if search.is_empty() {
        url = base.join(&format!("r/{}/{}.json", subreddit, query.sort.as_str()))?;
        url.query_pairs_mut().append_pair("after", &after);
    } else {
        url = base.join(&format!("r/{}/search.json", subreddit))?;
        url.query_pairs_mut()
            .append_pair("q", search)
            .append_pair("restrict_sr", "1")
            .append_pair("sort", query.sort.as_str())
            .append_pair("after", &after);
    }
    Ok(url)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Listing<T> {
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub children: Vec<Thing<T>>,
}

impl<T> Default for Listing<T> {
    fn default() -> Self {
        Listing {
            after: None,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub thumbnail: String,
    #[serde(default)]
    pub url_overridden_by_dest: String,
    #[serde(default)]
    pub preview: Preview,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Preview {
    #[serde(default)]
    pub images: Vec<PreviewImage>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewImage {
    #[serde(default)]
    pub source: PreviewSource,
    #[serde(default)]
    pub resolutions: Vec<PreviewSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreviewSource {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub width: i64,
    #[serde(default)]
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ListingEnvelope<T> {
    kind: String,
    data: Listing<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse(DEFAULT_BASE_URL).unwrap()
    }

    fn pairs(url: &Url) -> Vec<(String, String)> {
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn listing_url_without_search_targets_sort_endpoint() {
        let query = ListingQuery {
            subreddit: "wallpapers".into(),
            sort: SortOption::Hot,
            search: String::new(),
            after: None,
        };
        let url = listing_url(&base(), &query).unwrap();
        assert_eq!(url.path(), "/r/wallpapers/hot.json");
        assert_eq!(pairs(&url), vec![("after".to_string(), String::new())]);
    }

    #[test]
    fn listing_url_carries_cursor() {
        let query = ListingQuery {
            subreddit: "wallpapers".into(),
            sort: SortOption::New,
            search: String::new(),
            after: Some("t3_abc".into()),
        };
        let url = listing_url(&base(), &query).unwrap();
        assert_eq!(url.path(), "/r/wallpapers/new.json");
        assert_eq!(
            pairs(&url),
            vec![("after".to_string(), "t3_abc".to_string())]
        );
    }

    #[test]
    fn listing_url_with_search_targets_search_endpoint() {
        let query = ListingQuery {
            subreddit: "r/wallpapers".into(),
            sort: SortOption::Top,
            search: "sunset sky".into(),
            after: Some("t3_xyz".into()),
        };
        let url = listing_url(&base(), &query).unwrap();
        assert_eq!(url.path(), "/r/wallpapers/search.json");
        assert_eq!(
            pairs(&url),
            vec![
                ("q".to_string(), "sunset sky".to_string()),
                ("restrict_sr".to_string(), "1".to_string()),
                ("sort".to_string(), "top".to_string()),
                ("after".to_string(), "t3_xyz".to_string()),
            ]
        );
    }

    #[test]
    fn listing_url_rejects_empty_subreddit() {
        let query = ListingQuery::default();
        assert!(listing_url(&base(), &query).is_err());
    }

    #[test]
    fn decodes_listing_payload() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_abc",
                "children": [
                    {
                        "kind": "t3",
                        "data": {
                            "id": "abc",
                            "title": "Mountains",
                            "thumbnail": "https://a.thumbs.example/t.jpg",
                            "url_overridden_by_dest": "https://i.example/full.jpg",
                            "preview": {
                                "images": [
                                    {
                                        "source": {"url": "https://p.example/s.jpg", "width": 3840, "height": 2160},
                                        "resolutions": [
                                            {"url": "https://p.example/r0.jpg", "width": 108, "height": 60},
                                            {"url": "https://p.example/r1.jpg", "width": 216, "height": 121},
                                            {"url": "https://p.example/r2.jpg?s=1&amp;x=2", "width": 320, "height": 180}
                                        ]
                                    }
                                ],
                                "enabled": true
                            }
                        }
                    }
                ]
            }
        }"#;
        let envelope: ListingEnvelope<Post> = serde_json::from_str(raw).unwrap();
        let listing = envelope.data;
        assert_eq!(listing.after.as_deref(), Some("t3_abc"));
        assert_eq!(listing.children.len(), 1);
        let post = &listing.children[0].data;
        assert_eq!(post.id, "abc");
        assert_eq!(post.preview.images[0].resolutions.len(), 3);
    }

    #[test]
    fn decodes_listing_payload_without_optional_fields() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": null,
                "children": [
                    {"kind": "t3", "data": {"id": "x", "title": "Bare"}}
                ]
            }
        }"#;
        let envelope: ListingEnvelope<Post> = serde_json::from_str(raw).unwrap();
        let listing = envelope.data;
        assert!(listing.after.is_none());
        let post = &listing.children[0].data;
        assert!(post.thumbnail.is_empty());
        assert!(post.url_overridden_by_dest.is_empty());
        assert!(post.preview.images.is_empty());
    }
}
