use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reddit;

const DEFAULT_ENV_PREFIX: &str = "WALLFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub base_url: String,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            base_url: String::new(),
        }
    }
}

fn default_user_agent() -> String {
    format!("wallfeed/{} (terminal wallpaper browser)", crate::VERSION)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

fn default_timeout() -> Duration {
    reddit::DEFAULT_TIMEOUT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    #[serde(default = "default_subreddits")]
    pub subreddits: Vec<String>,
    #[serde(default = "default_sort")]
    pub default_sort: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subreddits: default_subreddits(),
            default_sort: default_sort(),
        }
    }
}

fn default_subreddits() -> Vec<String> {
    vec![
        "wallpapers".into(),
        "topwalls".into(),
        "AestheticWallpapers".into(),
        "WQHD_Wallpaper".into(),
    ]
}

fn default_sort() -> String {
    "hot".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UiConfig {
    #[serde(default = "default_theme")]
    pub theme: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
        }
    }
}

fn default_theme() -> String {
    "dark".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_download_dir")]
    pub download_dir: Option<PathBuf>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            download_dir: default_download_dir(),
        }
    }
}

fn default_workers() -> usize {
    2
}

fn default_download_dir() -> Option<PathBuf> {
    dirs::download_dir().map(|dir| dir.join("wallfeed"))
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    if !other.reddit.user_agent.is_empty() {
        base.reddit.user_agent = other.reddit.user_agent;
    }
    if !other.reddit.base_url.is_empty() {
        base.reddit.base_url = other.reddit.base_url;
    }

    if !other.http.timeout.is_zero() {
        base.http.timeout = other.http.timeout;
    }

    if !other.feed.subreddits.is_empty() {
        base.feed.subreddits = other.feed.subreddits;
    }
    if !other.feed.default_sort.is_empty() {
        base.feed.default_sort = other.feed.default_sort;
    }

    if !other.ui.theme.is_empty() {
        base.ui.theme = other.ui.theme;
    }

    if other.media.workers != 0 {
        base.media.workers = other.media.workers;
    }
    if other.media.download_dir.is_some() {
        base.media.download_dir = other.media.download_dir;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    // Start from sentinel values so the merge only picks up keys the
    // environment actually set.
    let mut cfg = empty_config();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn empty_config() -> Config {
    Config {
        reddit: RedditConfig {
            user_agent: String::new(),
            base_url: String::new(),
        },
        http: HttpConfig {
            timeout: Duration::ZERO,
        },
        feed: FeedConfig {
            subreddits: Vec::new(),
            default_sort: String::new(),
        },
        ui: UiConfig {
            theme: String::new(),
        },
        media: MediaConfig {
            workers: 0,
            download_dir: None,
        },
    }
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.base_url" => cfg.reddit.base_url = value,
        "http.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.http.timeout = duration;
            }
        }
        "feed.subreddits" => {
            cfg.feed.subreddits = value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        "feed.default_sort" => cfg.feed.default_sort = value,
        "ui.theme" => cfg.ui.theme = value,
        "media.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.media.workers = parsed;
            }
        }
        "media.download_dir" => cfg.media.download_dir = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wallfeed").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use tempfile::tempdir;

    #[test]
    fn load_defaults_without_files() {
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("WALLFEED_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "dark");
        assert_eq!(cfg.feed.subreddits, default_subreddits());
        assert_eq!(cfg.feed.default_sort, "hot");
        assert_eq!(cfg.http.timeout, reddit::DEFAULT_TIMEOUT);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "feed:\n  subreddits: [wallpapers, EarthPorn]\n  default_sort: new\nhttp:\n  timeout: 5s\n",
        )
        .unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(path),
            env_prefix: Some("WALLFEED_TEST_NONE".into()),
        })
        .unwrap();
        assert_eq!(cfg.feed.subreddits, vec!["wallpapers", "EarthPorn"]);
        assert_eq!(cfg.feed.default_sort, "new");
        assert_eq!(cfg.http.timeout, Duration::from_secs(5));
        assert_eq!(cfg.ui.theme, "dark");
    }

    #[test]
    fn env_overrides() {
        env::set_var("WALLFEED_ENVTEST_UI__THEME", "light");
        env::set_var("WALLFEED_ENVTEST_FEED__SUBREDDITS", "a, b,,c");
        let dir = tempdir().unwrap();
        let cfg = load(LoadOptions {
            config_file: Some(dir.path().join("missing.yaml")),
            env_prefix: Some("WALLFEED_ENVTEST".into()),
        })
        .unwrap();
        assert_eq!(cfg.ui.theme, "light");
        assert_eq!(cfg.feed.subreddits, vec!["a", "b", "c"]);
        env::remove_var("WALLFEED_ENVTEST_UI__THEME");
        env::remove_var("WALLFEED_ENVTEST_FEED__SUBREDDITS");
    }
}
