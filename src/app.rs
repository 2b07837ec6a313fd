use std::env;
use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::LevelFilter;
use simplelog::WriteLogger;

use crate::config;
use crate::feed::{self, FeedQuery};
use crate::media;
use crate::reddit::{self, SortOption};
use crate::theme;
use crate::ui;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    init_logging();

    let base_url = if cfg.reddit.base_url.is_empty() {
        None
    } else {
        Some(cfg.reddit.base_url.clone())
    };
    let client = reddit::Client::new(reddit::ClientConfig {
        user_agent: cfg.reddit.user_agent.clone(),
        base_url,
        timeout: Some(cfg.http.timeout),
        http_client: None,
    })
    .context("build reddit client")?;
    let service: Arc<dyn feed::ListingService> =
        Arc::new(feed::RedditListingService::new(Arc::new(client)));

    let subreddits = cfg.feed.subreddits.clone();
    let query = FeedQuery {
        subreddit: subreddits
            .first()
            .cloned()
            .unwrap_or_else(|| "wallpapers".to_string()),
        sort: SortOption::from_key(&cfg.feed.default_sort),
        search: String::new(),
    };
    let controller = feed::Controller::new(service, query);

    let media_manager = media::Manager::new(media::Config {
        workers: cfg.media.workers,
        user_agent: cfg.reddit.user_agent.clone(),
        download_dir: cfg.media.download_dir.clone(),
        ..Default::default()
    })
    .ok();
    let media_handle = media_manager.as_ref().map(|manager| manager.handle());

    let options = ui::Options {
        controller,
        subreddits,
        media: media_handle,
        theme: theme::Mode::from_key(&cfg.ui.theme),
    };
    let mut model = ui::Model::new(options);
    model.run()?;

    drop(media_manager);

    Ok(())
}

// The terminal owns stdout, so diagnostics go to a file under the cache dir.
fn init_logging() {
    let level = match env::var("WALLFEED_LOG").ok().as_deref() {
        Some("off") => return,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let Some(dir) = dirs::cache_dir().map(|dir| dir.join("wallfeed")) else {
        return;
    };
    if fs::create_dir_all(&dir).is_err() {
        return;
    }
    let Ok(file) = fs::File::create(dir.join("wallfeed.log")) else {
        return;
    };
    let _ = WriteLogger::init(level, simplelog::Config::default(), file);
}
