use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use bytes::Bytes;
use iori_dash::{ByteRange, DashError, DashResult, Downloader, Fetched};
use reqwest::StatusCode;
use tokio::sync::Notify;
use url::Url;

/// In-memory downloader serving fixed bodies by URL.
#[derive(Default)]
pub struct MockDownloader {
    bodies: Mutex<HashMap<Url, Bytes>>,
    gates: Mutex<HashMap<Url, Arc<Notify>>>,
    failing: AtomicBool,
    requests: AtomicUsize,
}

impl MockDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: impl Into<Bytes>) -> Url {
        let url = Url::parse(url).unwrap();
        self.bodies.lock().unwrap().insert(url.clone(), body.into());
        url
    }

    /// Makes every request fail with a server error until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Holds the next response for `url` back until the returned handle is notified.
    pub fn gate(&self, url: &Url) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().unwrap().insert(url.clone(), gate.clone());
        gate
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Downloader for MockDownloader {
    fn fetch(
        &self,
        url: &Url,
        _range: Option<&ByteRange>,
    ) -> impl Future<Output = DashResult<Fetched>> + Send {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing.load(Ordering::SeqCst) {
            Err(DashError::HttpError(StatusCode::SERVICE_UNAVAILABLE))
        } else {
            self.bodies
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .map(|data| Fetched {
                    url: url.clone(),
                    data,
                })
                .ok_or(DashError::HttpError(StatusCode::NOT_FOUND))
        };
        let gate = self.gates.lock().unwrap().remove(url);
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            result
        }
    }
}
