//! Wall clock of a dynamic presentation, kept in sync with the `UTCTiming` sources of
//! the manifest.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{manifest::UtcTiming, DashError, DashResult, Downloader};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UtcTimingMethod {
    Ntp,
    Sntp,
    HttpHead,
    HttpXsdate,
    HttpIso,
    HttpNtp,
    Direct,
}

impl UtcTimingMethod {
    pub const ALL: [Self; 7] = [
        Self::Ntp,
        Self::Sntp,
        Self::HttpHead,
        Self::HttpXsdate,
        Self::HttpIso,
        Self::HttpNtp,
        Self::Direct,
    ];

    pub fn from_scheme(scheme_id_uri: &str) -> Option<Self> {
        let scheme = scheme_id_uri.trim().strip_prefix("urn:mpeg:dash:utc:")?;
        let method = scheme
            .strip_suffix(":2014")
            .or_else(|| scheme.strip_suffix(":2012"))?;
        Some(match method {
            "ntp" => Self::Ntp,
            "sntp" => Self::Sntp,
            "http-head" => Self::HttpHead,
            "http-xsdate" => Self::HttpXsdate,
            "http-iso" => Self::HttpIso,
            "http-ntp" => Self::HttpNtp,
            "direct" => Self::Direct,
            _ => return None,
        })
    }

    fn bit(self) -> u32 {
        match self {
            Self::Ntp => 1 << 0,
            Self::Sntp => 1 << 1,
            Self::HttpHead => 1 << 2,
            Self::HttpXsdate => 1 << 3,
            Self::HttpIso => 1 << 4,
            Self::HttpNtp => 1 << 5,
            Self::Direct => 1 << 6,
        }
    }
}

/// Set of accepted [`UtcTimingMethod`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTimingMethods(u32);

impl UtcTimingMethods {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        UtcTimingMethod::ALL.into_iter().collect()
    }

    pub fn with(mut self, method: UtcTimingMethod) -> Self {
        self.0 |= method.bit();
        self
    }

    pub fn contains(&self, method: UtcTimingMethod) -> bool {
        self.0 & method.bit() != 0
    }
}

impl Default for UtcTimingMethods {
    /// Every scheme that can be resolved through a [`Downloader`], plus `direct`.
    fn default() -> Self {
        Self::empty()
            .with(UtcTimingMethod::HttpXsdate)
            .with(UtcTimingMethod::HttpIso)
            .with(UtcTimingMethod::HttpHead)
            .with(UtcTimingMethod::HttpNtp)
            .with(UtcTimingMethod::Direct)
    }
}

impl FromIterator<UtcTimingMethod> for UtcTimingMethods {
    fn from_iter<T: IntoIterator<Item = UtcTimingMethod>>(iter: T) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// First timing element with an accepted scheme, and the URLs (or values) it lists.
pub fn get_utc_timing_sources(
    timings: &[UtcTiming],
    methods: UtcTimingMethods,
) -> Option<(UtcTimingMethod, Vec<String>)> {
    timings.iter().find_map(|timing| {
        let method = UtcTimingMethod::from_scheme(&timing.scheme_id_uri)?;
        if !methods.contains(method) {
            return None;
        }
        let sources = timing
            .value
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();
        Some((method, sources))
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Clock {
    /// How much time the local clock is behind the remote clock
    offset: TimeDelta,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }

    pub(crate) fn set_time(
        &mut self,
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) {
        // the remote clock was read somewhere between the two local readings, assume the
        // middle of the round trip
        let rtt = after_request - before_request;
        let server_now = remote_now + rtt / 2;
        self.offset = server_now - after_request;
        tracing::info!(
            offset_milliseconds = %self.offset.num_milliseconds(),
            "Clock time set to {}, offset calculated",
            remote_now
        );
    }

    /// Measures the offset to the first timing source that answers. Timing sources are
    /// tried in document order; schemes outside `methods` are skipped.
    ///
    /// Without any timing element the local clock is used as is.
    pub async fn sync<D>(
        &mut self,
        timings: &[UtcTiming],
        downloader: &D,
        methods: UtcTimingMethods,
    ) -> DashResult<()>
    where
        D: Downloader,
    {
        if timings.is_empty() {
            tracing::warn!("No UTCTiming elements found in MPD, using local time.");
            self.offset = TimeDelta::zero();
            return Ok(());
        }

        let mut last_error: Option<DashError> = None;
        for timing in timings {
            tracing::debug!(
                scheme = %timing.scheme_id_uri,
                value = %timing.value.as_deref().unwrap_or(""),
                "Attempting to sync time with scheme"
            );
            match self.sync_with(timing, downloader, methods).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(scheme = %timing.scheme_id_uri, error = %e, "Time sync failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            DashError::InvalidTimingSchema("All supported time sync methods failed".to_string())
        }))
    }

    async fn sync_with<D>(
        &mut self,
        timing: &UtcTiming,
        downloader: &D,
        methods: UtcTimingMethods,
    ) -> DashResult<()>
    where
        D: Downloader,
    {
        let method = UtcTimingMethod::from_scheme(&timing.scheme_id_uri)
            .filter(|method| methods.contains(*method))
            .ok_or_else(|| DashError::InvalidTimingSchema(timing.scheme_id_uri.clone()))?;
        let value = timing.value.as_deref().ok_or_else(|| {
            DashError::InvalidTimingSchema(format!("Missing value for {}", timing.scheme_id_uri))
        })?;

        match method {
            UtcTimingMethod::HttpXsdate | UtcTimingMethod::HttpIso => {
                let mut last_error = None;
                for url in value.split_whitespace() {
                    let url = Url::parse(url)?;
                    let before_request = Utc::now();
                    let result = downloader.fetch(&url, None).await.and_then(|fetched| {
                        parse_iso8601_response(std::str::from_utf8(&fetched.data)?.trim())
                    });
                    match result {
                        Ok(remote_now) => {
                            self.set_time(remote_now, before_request, Utc::now());
                            return Ok(());
                        }
                        Err(e) => {
                            tracing::warn!(%url, error = %e, "Failed to read xsdate/iso8601 time");
                            last_error = Some(e);
                        }
                    }
                }
                Err(last_error.unwrap_or_else(|| {
                    DashError::InvalidTimingSchema("Missing value".to_string())
                }))
            }
            UtcTimingMethod::Direct => {
                let now = Utc::now();
                let remote_now = parse_iso8601_response(value.trim())?;
                self.set_time(remote_now, now, now);
                Ok(())
            }
            // the downloader only hands out bodies, and NTP needs a socket of its own
            UtcTimingMethod::HttpHead
            | UtcTimingMethod::HttpNtp
            | UtcTimingMethod::Ntp
            | UtcTimingMethod::Sntp => Err(DashError::InvalidTimingSchema(format!(
                "Unsupported scheme: {}",
                timing.scheme_id_uri
            ))),
        }
    }
}

fn parse_iso8601_response(response_text: &str) -> DashResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(response_text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Allow Z suffix for UTC, which is not strictly RFC3339 but used by xsdate
            DateTime::parse_from_str(response_text, "%Y-%m-%dT%H:%M:%SZ")
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(response_text, "%Y-%m-%dT%H:%M:%S%.fZ")
                .map(|dt| dt.and_utc())
        })?)
}
