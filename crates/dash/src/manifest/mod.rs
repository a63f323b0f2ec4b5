//! # Presentation model
//!
//! A typed view of an MPD, built from the node tree decoded by [`dash_mpd`].
//!
//! > The MPD defines the MPD timeline of a DASH presentation, which serves as the baseline
//! > for all scheduling decisions made during playback and establishes the relative timing
//! > of periods and media segments.
//!
//! > Values on the MPD timeline are all ultimately relative to the zero point of the MPD
//! > timeline, though possibly through several layers of indirection (e.g. period A is
//! > relative to period B, which is relative to the zero point).
//!
//! The tree is built in one go: either every period, adaptation set and representation
//! resolves, or [`Presentation::parse`] fails and nothing is returned.

pub mod addressing;
pub mod template;
pub mod url;

mod period;

use std::time::Duration;

use chrono::{DateTime, Utc};
use dash_mpd::MPD;

pub use addressing::{
    ListSegment, ResourceRef, SampleTimeline, SegmentAddressing, SegmentBaseInfo,
    SegmentListInfo, SegmentTemplateInfo, TimelineEntry,
};
pub use period::{AdaptationSet, ExternalLink, Framerate, MediaKind, Period, Representation};

use self::{addressing::AddressingScope, url::resolve_chain};
use crate::{DashError, DashResult};

/// There exist two types of DASH presentations, indicated by MPD@type [DASH].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresentationType {
    /// Any media segment may be presented at any time; the entire presentation is
    /// available at any time.
    #[default]
    Static,
    /// The MPD timeline is mapped to wall clock time. Media segments become available and
    /// cease to be available with the passage of time, and the MPD may change over time.
    Dynamic,
}

/// A `UTCTiming` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtcTiming {
    pub scheme_id_uri: String,
    pub value: Option<String>,
}

pub struct Presentation {
    pub presentation_type: PresentationType,
    pub profiles: Vec<String>,
    /// Unknown for open-ended live presentations.
    pub media_presentation_duration: Option<Duration>,
    pub minimum_update_period: Option<Duration>,
    /// In a dynamic presentation, the zero point of the MPD timeline is mapped to this
    /// point in wall clock time.
    pub availability_start_time: Option<DateTime<Utc>>,
    pub time_shift_buffer_depth: Option<Duration>,
    pub suggested_presentation_delay: Option<Duration>,
    pub max_segment_duration: Option<Duration>,
    pub periods: Vec<Period>,
    pub utc_timings: Vec<UtcTiming>,
    /// Manifest URL (or its redirect target) merged with the MPD level BaseURL.
    pub base_url: ::url::Url,
    /// The URL relative references were resolved against.
    pub location: ::url::Url,

    mpd: MPD,
}

impl Presentation {
    /// Parses raw manifest bytes. Relative URLs are resolved against `manifest_url`.
    pub fn parse(data: &[u8], manifest_url: &::url::Url) -> DashResult<Self> {
        let text = std::str::from_utf8(data)?;
        let mpd = dash_mpd::parse(text)?;
        Self::from_mpd(mpd, manifest_url)
    }

    pub fn from_mpd(mpd: MPD, manifest_url: &::url::Url) -> DashResult<Self> {
        if mpd.periods.is_empty() {
            return Err(DashError::NoPeriodFound);
        }

        let presentation_type = match mpd.mpdtype.as_deref() {
            Some("dynamic") => PresentationType::Dynamic,
            Some("static") | None => PresentationType::Static,
            Some(other) => {
                return Err(DashError::MpdParsing(format!("Unknown MPD@type {other:?}")))
            }
        };

        let base_url = resolve_chain(
            manifest_url,
            mpd.base_url.first().map(|u| u.base.as_str()),
        )?;

        let scope = AddressingScope::default();
        let mut periods: Vec<Period> = Vec::with_capacity(mpd.periods.len());
        for (index, period) in mpd.periods.iter().enumerate() {
            let period = Period::from_mpd(
                index,
                period,
                periods.last_mut(),
                presentation_type,
                &base_url,
                &scope,
            )?;
            periods.push(period);
        }

        // the last period ends with the presentation, if its duration is known
        if let (Some(last), Some(total)) = (periods.last_mut(), mpd.mediaPresentationDuration) {
            if last.duration.is_none() {
                last.duration = Some(total.saturating_sub(last.start));
            }
        }

        let profiles = mpd
            .profiles
            .as_deref()
            .map(|profiles| {
                profiles
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let utc_timings = mpd
            .UTCTiming
            .iter()
            .map(|timing| UtcTiming {
                scheme_id_uri: timing.schemeIdUri.to_string(),
                value: timing.value.clone(),
            })
            .collect();

        tracing::debug!(
            periods = periods.len(),
            r#type = ?presentation_type,
            %base_url,
            "Built presentation"
        );

        Ok(Self {
            presentation_type,
            profiles,
            media_presentation_duration: mpd.mediaPresentationDuration,
            minimum_update_period: mpd.minimumUpdatePeriod,
            availability_start_time: mpd.availabilityStartTime,
            time_shift_buffer_depth: mpd.timeShiftBufferDepth,
            suggested_presentation_delay: mpd.suggestedPresentationDelay,
            max_segment_duration: mpd.maxSegmentDuration,
            periods,
            utc_timings,
            base_url,
            location: manifest_url.clone(),
            mpd,
        })
    }

    pub fn is_static(&self) -> bool {
        matches!(self.presentation_type, PresentationType::Static)
    }

    pub fn is_dynamic(&self) -> bool {
        !self.is_static()
    }

    /// The node tree this presentation was built from.
    pub fn mpd(&self) -> &MPD {
        &self.mpd
    }

    /// Index of the last period starting at or before `time`.
    ///
    /// Times before the first period map to the first period.
    pub fn period_index_at(&self, time: Duration) -> usize {
        self.periods
            .partition_point(|period| period.start <= time)
            .saturating_sub(1)
    }

    pub fn period_index_by_id(&self, id: &str) -> Option<usize> {
        self.periods
            .iter()
            .position(|period| period.id.as_deref() == Some(id))
    }

    /// Periods declared through `xlink:href` with `xlink:actuate="onLoad"` that still have to
    /// be fetched.
    pub fn pending_external_periods(&self) -> impl Iterator<Item = (usize, &ExternalLink)> {
        self.periods
            .iter()
            .enumerate()
            .filter_map(|(index, period)| period.xlink.as_ref().map(|link| (index, link)))
            .filter(|(_, link)| link.on_load)
    }
}
