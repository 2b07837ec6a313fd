use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use percent_encoding::percent_decode_str;
use reqwest::blocking::Client;
use url::Url;

use crate::gallery::GalleryItem;

#[derive(Debug, Clone)]
pub struct Config {
    pub workers: usize,
    pub timeout: Duration,
    pub user_agent: String,
    pub download_dir: Option<PathBuf>,
    pub http_client: Option<Client>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(30),
            user_agent: String::new(),
            download_dir: None,
            http_client: None,
        }
    }
}

enum Job {
    Fetch {
        url: String,
        tx: Sender<Result<Vec<u8>>>,
    },
    Save {
        item: GalleryItem,
        tx: Sender<Result<PathBuf>>,
    },
}

struct Inner {
    cfg: Config,
    client: Client,
    jobs: Sender<Job>,
    stop: Sender<()>,
}

/// Background image workers: full-resolution bytes for the overlay preview
/// and writes to the download directory. Nothing is cached; every job hits
/// the network.
pub struct Manager {
    inner: Arc<Inner>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl Manager {
    pub fn new(cfg: Config) -> Result<Self> {
        let mut cfg = cfg;
        if cfg.workers == 0 {
            cfg.workers = 2;
        }

        let client = if let Some(client) = cfg.http_client.clone() {
            client
        } else {
            let mut builder = Client::builder().timeout(cfg.timeout);
            if !cfg.user_agent.trim().is_empty() {
                builder = builder.user_agent(cfg.user_agent.clone());
            }
            builder.build().context("media: build http client")?
        };

        let (job_tx, job_rx) = unbounded();
        let (stop_tx, stop_rx) = unbounded();

        let inner = Arc::new(Inner {
            cfg,
            client,
            jobs: job_tx,
            stop: stop_tx,
        });

        let mut handles = Vec::new();
        for _ in 0..inner.cfg.workers {
            let rx_jobs = job_rx.clone();
            let rx_stop = stop_rx.clone();
            let worker_inner = inner.clone();
            handles.push(thread::spawn(move || worker_inner.worker(rx_jobs, rx_stop)));
        }

        Ok(Self { inner, handles })
    }

    pub fn handle(&self) -> Handle {
        Handle {
            inner: self.inner.clone(),
        }
    }

    fn shutdown(&mut self) {
        for _ in &self.handles {
            let _ = self.inner.stop.send(());
        }
        while let Some(handle) = self.handles.pop() {
            let _ = handle.join();
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct Handle {
    inner: Arc<Inner>,
}

impl Handle {
    /// Fetches the image behind `url` into memory; the result arrives on the
    /// returned channel.
    pub fn fetch_image(&self, url: &str) -> Receiver<Result<Vec<u8>>> {
        let (tx, rx) = unbounded();
        let _ = self.inner.jobs.send(Job::Fetch {
            url: url.to_string(),
            tx,
        });
        rx
    }

    /// Saves the item's full image under the configured download directory.
    pub fn download(&self, item: &GalleryItem) -> Receiver<Result<PathBuf>> {
        let (tx, rx) = unbounded();
        let _ = self.inner.jobs.send(Job::Save {
            item: item.clone(),
            tx,
        });
        rx
    }
}

impl Inner {
    fn worker(&self, jobs: Receiver<Job>, stop: Receiver<()>) {
        loop {
            crossbeam_channel::select! {
                recv(stop) -> _ => break,
                recv(jobs) -> msg => {
                    match msg {
                        Ok(job) => self.process(job),
                        Err(_) => break,
                    }
                }
            }
        }
    }

    fn process(&self, job: Job) {
        match job {
            Job::Fetch { url, tx } => {
                let _ = tx.send(self.fetch_bytes(&url));
            }
            Job::Save { item, tx } => {
                let _ = tx.send(self.save(&item));
            }
        }
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        if url.is_empty() {
            bail!("media: url required");
        }
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("media: request {}", url))?;
        if !response.status().is_success() {
            bail!("media: request failed with status {}", response.status());
        }
        let mut reader = response;
        let mut bytes = Vec::with_capacity(128 * 1024);
        reader
            .read_to_end(&mut bytes)
            .with_context(|| format!("media: read body {}", url))?;
        Ok(bytes)
    }

    fn save(&self, item: &GalleryItem) -> Result<PathBuf> {
        let dir = self
            .cfg
            .download_dir
            .clone()
            .ok_or_else(|| anyhow!("media: download dir not configured"))?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("media: create download dir {}", dir.display()))?;

        let bytes = self.fetch_bytes(&item.full_url)?;
        let path = unique_path(&dir, &file_name_for(&item.full_url));
        fs::write(&path, bytes).with_context(|| format!("media: write {}", path.display()))?;
        Ok(path)
    }
}

/// Derives a file name from the percent-decoded last path segment of the
/// image URL.
pub fn file_name_for(url: &str) -> String {
    let segment = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.last().map(str::to_string))
    });
    match segment {
        Some(segment) if !segment.is_empty() => {
            let decoded = percent_decode_str(&segment).decode_utf8_lossy();
            decoded.replace(['/', '\\'], "_")
        }
        _ => "wallpaper.jpg".to_string(),
    }
}

fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), format!(".{ext}")),
        None => (name.to_string(), String::new()),
    };
    for n in 1.. {
        let candidate = dir.join(format!("{stem}-{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_name_comes_from_last_segment() {
        assert_eq!(
            file_name_for("https://i.example/abc/def/view.jpg"),
            "view.jpg"
        );
        assert_eq!(
            file_name_for("https://i.example/morning%20mist.png?x=1"),
            "morning mist.png"
        );
        assert_eq!(file_name_for("not a url"), "wallpaper.jpg");
    }

    #[test]
    fn unique_path_avoids_collisions() {
        let dir = tempdir().unwrap();
        assert_eq!(
            unique_path(dir.path(), "view.jpg"),
            dir.path().join("view.jpg")
        );
        fs::write(dir.path().join("view.jpg"), b"x").unwrap();
        assert_eq!(
            unique_path(dir.path(), "view.jpg"),
            dir.path().join("view-1.jpg")
        );
        fs::write(dir.path().join("view-1.jpg"), b"x").unwrap();
        assert_eq!(
            unique_path(dir.path(), "view.jpg"),
            dir.path().join("view-2.jpg")
        );
    }

    #[test]
    fn download_without_dir_reports_error() {
        let manager = Manager::new(Config {
            workers: 1,
            ..Default::default()
        })
        .unwrap();
        let item = GalleryItem {
            id: "abc".into(),
            title: "Misty".into(),
            thumbnail_url: "https://t.example/low.jpg".into(),
            full_url: "https://i.example/full.jpg".into(),
        };
        let rx = manager.handle().download(&item);
        let result = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker reply");
        assert!(result.is_err());
    }
}
