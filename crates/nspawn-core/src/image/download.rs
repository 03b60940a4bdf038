use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    config::DownloadSpec,
    image::error::ImageError,
    machine::{MachineBus, PullRequest},
};

/// Pulls images through the import manager.
///
/// The import manager accepts only one transfer per URL at a time, so pulls
/// of the same URL are serialised behind a per-URL lock. Different URLs
/// download concurrently.
#[derive(Clone)]
pub struct ImageDownloader {
    bus: Arc<dyn MachineBus>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    poll: Duration,
}

impl ImageDownloader {
    pub fn new(bus: Arc<dyn MachineBus>, poll: Duration) -> Self {
        Self {
            bus,
            locks: Arc::new(Mutex::new(HashMap::new())),
            poll,
        }
    }

    async fn url_lock(&self, url: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(url.to_string()).or_default())
    }

    /// Drop the lock for `url` once no other pull holds or waits on it.
    async fn release(&self, url: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // the map and `lock` are the only references left
        if Arc::strong_count(&lock) == 2 {
            locks.remove(url);
        }
    }

    /// Download `spec.url` as image `name` and wait for the transfer to finish.
    pub async fn pull(&self, name: &str, spec: &DownloadSpec) -> Result<(), ImageError> {
        let lock = self.url_lock(&spec.url).await;
        debug!(url = %spec.url, "waiting on remote lock");
        let result = {
            let _guard = lock.lock().await;
            self.transfer(name, spec).await
        };
        self.release(&spec.url, lock).await;
        result
    }

    async fn transfer(&self, name: &str, spec: &DownloadSpec) -> Result<(), ImageError> {
        let id = self
            .bus
            .pull_image(&PullRequest {
                kind: spec.kind,
                url: spec.url.clone(),
                local: name.to_string(),
                verify: spec.verify,
                force: spec.force,
            })
            .await
            .map_err(ImageError::Download)?;

        info!(image = name, transfer = id, "downloading image");
        let mut ticker = tokio::time::interval(self.poll);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // a failed listing counts as "no transfers left"
            let transfers = self.bus.list_transfers().await.unwrap_or_default();
            match transfers.iter().find(|t| t.id == id) {
                Some(t) if t.progress.is_finite() && t.progress.abs() != f64::MAX => {
                    info!(image = name, progress = t.progress, "downloading image");
                }
                Some(_) => {}
                None => break,
            }
        }

        info!(image = name, "downloaded image");
        Ok(())
    }
}
