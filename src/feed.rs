use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::warn;

use crate::gallery::GalleryItem;
use crate::reddit::{self, ListingQuery, SortOption};

pub trait ListingService: Send + Sync {
    fn fetch(&self, query: &ListingQuery) -> Result<reddit::Listing<reddit::Post>>;
}

pub struct RedditListingService {
    client: Arc<reddit::Client>,
}

impl RedditListingService {
    pub fn new(client: Arc<reddit::Client>) -> Self {
        Self { client }
    }
}

impl ListingService for RedditListingService {
    fn fetch(&self, query: &ListingQuery) -> Result<reddit::Listing<reddit::Post>> {
        self.client.listing(query).context("fetch listing page")
    }
}

/// The request parameters the whole feed hangs off. Changing any field
/// invalidates the accumulated items and the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub subreddit: String,
    pub sort: SortOption,
    pub search: String,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            subreddit: "wallpapers".into(),
            sort: SortOption::Hot,
            search: String::new(),
        }
    }
}

/// A partial update to the feed query.
#[derive(Debug, Clone, Default)]
pub struct QueryPatch {
    pub subreddit: Option<String>,
    pub sort: Option<SortOption>,
    pub search: Option<String>,
}

impl QueryPatch {
    pub fn subreddit<S: Into<String>>(name: S) -> Self {
        Self {
            subreddit: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn sort(sort: SortOption) -> Self {
        Self {
            sort: Some(sort),
            ..Default::default()
        }
    }

    pub fn search<S: Into<String>>(text: S) -> Self {
        Self {
            search: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
    Replace,
    Append,
}

#[derive(Debug)]
struct PageBatch {
    items: Vec<GalleryItem>,
    after: Option<String>,
}

struct FeedResponse {
    generation: u64,
    mode: LoadMode,
    result: Result<PageBatch>,
}

/// Owns all mutable feed state and drives the paged fetch loop. Fetches run
/// on spawned threads and report back over a channel; `pump` applies them on
/// the caller's thread, so none of the state here needs locking.
pub struct Controller {
    service: Arc<dyn ListingService>,
    query: FeedQuery,
    items: Vec<GalleryItem>,
    after: Option<String>,
    generation: u64,
    /// Generation of the fetch currently in flight, if any.
    pending: Option<u64>,
    viewing: Option<GalleryItem>,
    viewport_capacity: usize,
    tx: Sender<FeedResponse>,
    rx: Receiver<FeedResponse>,
}

impl Controller {
    pub fn new(service: Arc<dyn ListingService>, query: FeedQuery) -> Self {
        let (tx, rx) = unbounded();
        Self {
            service,
            query,
            items: Vec::new(),
            after: None,
            generation: 0,
            pending: None,
            viewing: None,
            viewport_capacity: 0,
            tx,
            rx,
        }
    }

    pub fn query(&self) -> &FeedQuery {
        &self.query
    }

    pub fn items(&self) -> &[GalleryItem] {
        &self.items
    }

    pub fn after(&self) -> Option<&str> {
        self.after.as_deref()
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn end_of_feed(&self) -> bool {
        !self.items.is_empty() && self.after.is_none() && self.pending.is_none()
    }

    pub fn viewing(&self) -> Option<&GalleryItem> {
        self.viewing.as_ref()
    }

    /// Merges a partial query update. A patch that leaves the query unchanged
    /// does nothing; otherwise the accumulated items and cursor are cleared
    /// and a reset fetch for the new query generation is issued.
    pub fn set_query(&mut self, patch: QueryPatch) {
        let mut next = self.query.clone();
        if let Some(subreddit) = patch.subreddit {
            next.subreddit = subreddit;
        }
        if let Some(sort) = patch.sort {
            next.sort = sort;
        }
        if let Some(search) = patch.search {
            next.search = search;
        }
        if next == self.query {
            return;
        }
        self.query = next;
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
        self.items.clear();
        self.after = None;
        self.fetch_page(true);
    }

    /// Re-fetches the first page of the unchanged query. The visible items
    /// stay until the replacement page lands.
    pub fn refresh(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
        self.fetch_page(true);
    }

    /// Issues one page fetch. At most one fetch is in flight per query
    /// generation; a non-reset fetch without a held cursor is the end of the
    /// feed and does nothing.
    pub fn fetch_page(&mut self, reset: bool) {
        if self.pending.is_some() {
            return;
        }
        let after = if reset {
            None
        } else {
            match self.after.as_deref() {
                Some(after) if !after.trim().is_empty() => Some(after.to_string()),
                _ => return,
            }
        };

        let listing_query = ListingQuery {
            subreddit: self.query.subreddit.clone(),
            sort: self.query.sort,
            search: self.query.search.clone(),
            after,
        };
        let generation = self.generation;
        let mode = if reset {
            LoadMode::Replace
        } else {
            LoadMode::Append
        };
        self.pending = Some(generation);

        let service = self.service.clone();
        let tx = self.tx.clone();
        thread::spawn(move || {
            let result = service.fetch(&listing_query).map(|listing| PageBatch {
                after: listing.after,
                items: listing
                    .children
                    .iter()
                    .filter_map(|thing| GalleryItem::from_post(&thing.data))
                    .collect(),
            });
            let _ = tx.send(FeedResponse {
                generation,
                mode,
                result,
            });
        });
    }

    /// Drains completed fetches. Returns true when any state changed.
    pub fn pump(&mut self) -> bool {
        let mut changed = false;
        while let Ok(resp) = self.rx.try_recv() {
            changed |= self.apply(resp);
        }
        changed
    }

    fn apply(&mut self, resp: FeedResponse) -> bool {
        if resp.generation != self.generation {
            // The fetch outlived its query; its results no longer apply.
            return false;
        }
        self.pending = None;
        match resp.result {
            Ok(batch) => {
                match resp.mode {
                    LoadMode::Replace => self.items = batch.items,
                    LoadMode::Append => self.items.extend(batch.items),
                }
                self.after = batch.after;
                self.maybe_top_up();
                true
            }
            Err(err) => {
                // Items and cursor stay as they were; only the loading
                // indicator clears.
                warn!("feed: page fetch failed: {err:#}");
                true
            }
        }
    }

    /// Reactive fill rule, evaluated after every applied page and viewport
    /// change: while a cursor is held and the loaded items cannot cover the
    /// viewport, keep fetching.
    pub fn maybe_top_up(&mut self) {
        if self.pending.is_some() {
            return;
        }
        let Some(after) = self.after.as_deref() else {
            return;
        };
        if after.trim().is_empty() {
            return;
        }
        if self.items.len() >= self.viewport_capacity {
            return;
        }
        self.fetch_page(false);
    }

    /// Tells the controller how many grid cells the rendering surface can
    /// currently show.
    pub fn set_viewport(&mut self, capacity: usize) {
        if capacity == self.viewport_capacity {
            return;
        }
        self.viewport_capacity = capacity;
        self.maybe_top_up();
    }

    pub fn select(&mut self, item: Option<GalleryItem>) {
        self.viewing = item;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reddit::{Listing, Post, Preview, Thing};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedService {
        pages: Mutex<VecDeque<Result<Listing<Post>>>>,
        calls: Mutex<Vec<ListingQuery>>,
    }

    impl ScriptedService {
        fn new(pages: Vec<Result<Listing<Post>>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<ListingQuery> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ListingService for ScriptedService {
        fn fetch(&self, query: &ListingQuery) -> Result<Listing<Post>> {
            self.calls.lock().unwrap().push(query.clone());
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Listing::default()))
        }
    }

    fn image_post(id: &str) -> Post {
        Post {
            id: id.into(),
            title: format!("Wallpaper {id}"),
            thumbnail: "https://t.example/low.jpg".into(),
            url_overridden_by_dest: format!("https://i.example/{id}.jpg"),
            preview: Preview::default(),
        }
    }

    fn video_post(id: &str) -> Post {
        Post {
            id: id.into(),
            title: format!("Clip {id}"),
            thumbnail: "https://t.example/low.jpg".into(),
            url_overridden_by_dest: format!("https://v.example/{id}.gifv"),
            preview: Preview::default(),
        }
    }

    fn page(posts: Vec<Post>, after: Option<&str>) -> Result<Listing<Post>> {
        Ok(Listing {
            after: after.map(str::to_string),
            children: posts
                .into_iter()
                .map(|post| Thing {
                    kind: "t3".into(),
                    data: post,
                })
                .collect(),
        })
    }

    fn pump_blocking(ctrl: &mut Controller) {
        while ctrl.is_loading() {
            let resp = ctrl
                .rx
                .recv_timeout(Duration::from_secs(5))
                .expect("fetch response");
            ctrl.apply(resp);
        }
    }

    fn ids(ctrl: &Controller) -> Vec<String> {
        ctrl.items().iter().map(|item| item.id.clone()).collect()
    }

    #[test]
    fn first_page_keeps_only_image_posts() {
        let service = ScriptedService::new(vec![page(
            vec![image_post("a"), video_post("v"), image_post("b")],
            Some("t3_abc"),
        )]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);

        assert_eq!(ids(&ctrl), vec!["a", "b"]);
        assert_eq!(ctrl.after(), Some("t3_abc"));
        let calls = service.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].subreddit, "wallpapers");
        assert_eq!(calls[0].sort, SortOption::Hot);
        assert!(calls[0].search.is_empty());
        assert!(calls[0].after.is_none());
    }

    #[test]
    fn pages_append_in_response_order_without_dedupe() {
        let service = ScriptedService::new(vec![
            page(vec![image_post("a"), image_post("b")], Some("t3_1")),
            page(vec![image_post("b"), image_post("c")], None),
        ]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);
        ctrl.fetch_page(false);
        pump_blocking(&mut ctrl);

        // Upstream repeated "b"; the list keeps the concatenation as-is.
        assert_eq!(ids(&ctrl), vec!["a", "b", "b", "c"]);
        assert!(ctrl.after().is_none());
        assert!(ctrl.end_of_feed());
        assert_eq!(service.calls()[1].after.as_deref(), Some("t3_1"));
    }

    #[test]
    fn set_query_clears_state_before_search_request() {
        let service = ScriptedService::new(vec![
            page((0..10).map(|i| image_post(&format!("p{i}"))).collect(), Some("t3_next")),
            page(vec![image_post("s1")], None),
        ]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);
        assert_eq!(ctrl.items().len(), 10);
        assert!(ctrl.after().is_some());

        ctrl.set_query(QueryPatch::search("sunset"));
        // Cleared synchronously, before the search response can land.
        assert!(ctrl.items().is_empty());
        assert!(ctrl.after().is_none());
        assert!(ctrl.is_loading());

        pump_blocking(&mut ctrl);
        assert_eq!(ids(&ctrl), vec!["s1"]);
        let calls = service.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].search, "sunset");
        assert!(calls[1].after.is_none());
    }

    #[test]
    fn unchanged_patch_does_nothing() {
        let service = ScriptedService::new(vec![]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.set_query(QueryPatch::search(""));
        ctrl.set_query(QueryPatch::subreddit("wallpapers"));
        assert!(!ctrl.is_loading());
        assert!(service.calls().is_empty());
    }

    #[test]
    fn no_fetch_without_cursor() {
        let service = ScriptedService::new(vec![page(vec![image_post("a")], None)]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);
        assert!(ctrl.after().is_none());

        ctrl.fetch_page(false);
        ctrl.set_viewport(50);
        ctrl.maybe_top_up();
        assert!(!ctrl.is_loading());
        assert_eq!(service.calls().len(), 1);
    }

    #[test]
    fn failed_fetch_is_a_noop_transition() {
        let service = ScriptedService::new(vec![
            page(vec![image_post("a")], Some("t3_1")),
            Err(anyhow::anyhow!("connection reset")),
        ]);
        let mut ctrl = Controller::new(service, FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);
        ctrl.fetch_page(false);
        pump_blocking(&mut ctrl);

        assert_eq!(ids(&ctrl), vec!["a"]);
        assert_eq!(ctrl.after(), Some("t3_1"));
        assert!(!ctrl.is_loading());
    }

    #[test]
    fn stale_generation_response_is_discarded() {
        let service = ScriptedService::new(vec![
            page(vec![image_post("old")], Some("t3_old")),
            page(vec![image_post("new")], None),
        ]);
        let mut ctrl = Controller::new(service, FeedQuery::default());
        ctrl.fetch_page(true);
        let stale = ctrl
            .rx
            .recv_timeout(Duration::from_secs(5))
            .expect("first response");

        ctrl.set_query(QueryPatch::search("sunset"));
        assert!(!ctrl.apply(stale));
        assert!(ctrl.items().is_empty());
        assert!(ctrl.is_loading());

        pump_blocking(&mut ctrl);
        assert_eq!(ids(&ctrl), vec!["new"]);
    }

    #[test]
    fn top_up_fills_viewport_one_fetch_at_a_time() {
        let service = ScriptedService::new(vec![
            page(vec![image_post("a"), image_post("b")], Some("t3_1")),
            page(vec![image_post("c"), image_post("d")], Some("t3_2")),
            page(vec![image_post("e"), image_post("f")], Some("t3_3")),
        ]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.set_viewport(5);
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);

        // Two items per page; the third page pushes past the viewport and
        // the top-up stops with the cursor still held.
        assert_eq!(ctrl.items().len(), 6);
        assert_eq!(service.calls().len(), 3);
        assert_eq!(ctrl.after(), Some("t3_3"));
    }

    #[test]
    fn fetch_is_single_flight() {
        let service = ScriptedService::new(vec![page(vec![image_post("a")], Some("t3_1"))]);
        let mut ctrl = Controller::new(service.clone(), FeedQuery::default());
        ctrl.fetch_page(true);
        ctrl.fetch_page(true);
        ctrl.fetch_page(false);
        pump_blocking(&mut ctrl);
        assert_eq!(service.calls().len(), 1);
    }

    #[test]
    fn select_drives_only_the_viewed_item() {
        let service = ScriptedService::new(vec![page(vec![image_post("a")], None)]);
        let mut ctrl = Controller::new(service, FeedQuery::default());
        ctrl.fetch_page(true);
        pump_blocking(&mut ctrl);

        let item = ctrl.items()[0].clone();
        ctrl.select(Some(item.clone()));
        assert_eq!(ctrl.viewing(), Some(&item));
        assert_eq!(ctrl.items().len(), 1);

        ctrl.select(None);
        assert!(ctrl.viewing().is_none());
        assert_eq!(ctrl.items().len(), 1);
    }
}
