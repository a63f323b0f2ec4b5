use std::{future::Future, ops::Deref, sync::Arc};

use bytes::Bytes;
use reqwest::{
    header::{ACCEPT, RANGE},
    Client, ClientBuilder,
};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::{ByteRange, DashError, DashResult};

const DASH_ACCEPT: &str = "application/dash+xml,video/vnd.mpeg.dash.mpd,*/*;q=0.8";

/// Response of a [`Downloader`].
#[derive(Debug, Clone)]
pub struct Fetched {
    /// Where the data actually came from, after following redirects.
    pub url: Url,
    pub data: Bytes,
}

/// Transfers manifests, external periods and timing sources.
///
/// Retry and timeout policy belongs to the implementation.
pub trait Downloader: Send + Sync {
    fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
    ) -> impl Future<Output = DashResult<Fetched>> + Send;
}

impl<D> Downloader for Arc<D>
where
    D: Downloader,
{
    fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
    ) -> impl Future<Output = DashResult<Fetched>> + Send {
        self.as_ref().fetch(url, range)
    }
}

/// [`Downloader`] backed by a reqwest client with a shared cookie store.
#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
    cookies_store: Arc<CookieStoreMutex>,
}

impl HttpDownloader {
    pub fn new(builder: ClientBuilder) -> DashResult<Self> {
        let cookies_store = Arc::new(CookieStoreMutex::new(CookieStore::default()));
        let client = builder.cookie_provider(cookies_store.clone()).build()?;

        Ok(Self {
            client,
            cookies_store,
        })
    }

    pub fn add_cookies(&self, cookies: Vec<String>, url: &Url) {
        let mut lock = self
            .cookies_store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for cookie in cookies {
            if let Err(e) = lock.parse(&cookie, url) {
                tracing::warn!(%url, error = %e, "Ignoring invalid cookie");
            }
        }
    }
}

impl Deref for HttpDownloader {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        url: &Url,
        range: Option<&ByteRange>,
    ) -> impl Future<Output = DashResult<Fetched>> + Send {
        let mut request = self.client.get(url.clone()).header(ACCEPT, DASH_ACCEPT);
        if let Some(range) = range {
            request = request.header(RANGE, range.to_http_range());
        }

        async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                if let Ok(body) = response.text().await {
                    tracing::warn!("Error body: {body}");
                }
                return Err(DashError::HttpError(status));
            }

            let url = response.url().clone();
            let data = response.bytes().await?;
            tracing::debug!(%url, bytes = data.len(), "Fetched");
            Ok(Fetched { url, data })
        }
    }
}
