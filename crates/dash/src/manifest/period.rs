use std::{cmp::Ordering, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use super::{
    addressing::{AddressingScope, SegmentAddressing},
    url::resolve_chain,
    PresentationType,
};
use crate::{DashError, DashResult};

/// An MPD defines an ordered list of one or more consecutive non-overlapping periods ([DASH] 5.3.2).
/// A period is both a time span on the MPD timeline and a definition of the data to be presented
/// during this time span.
pub struct Period {
    pub id: Option<String>,
    /// Relative to the zero point of the MPD timeline.
    pub start: Duration,
    /// `None` for the open-ended last period of a live presentation.
    pub duration: Option<Duration>,
    pub adaptation_sets: Vec<AdaptationSet>,
    /// Set while the period content lives in a remote document.
    pub xlink: Option<ExternalLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalLink {
    pub href: String,
    /// `xlink:actuate="onLoad"`: resolve before playback starts.
    pub on_load: bool,
}

impl Period {
    pub(crate) fn from_mpd(
        index: usize,
        period: &dash_mpd::Period,
        previous: Option<&mut Self>,
        presentation_type: PresentationType,
        base_url: &Url,
        scope: &AddressingScope<'_>,
    ) -> DashResult<Self> {
        let start = match (period.start, previous) {
            (Some(start), previous) => {
                // an unspecified duration of the previous period ends where this one starts
                if let Some(previous) = previous {
                    if previous.duration.is_none() {
                        previous.duration = Some(start.saturating_sub(previous.start));
                    }
                }
                start
            }
            // remote periods have no extent until they are resolved
            (None, Some(previous))
                if previous.duration.is_none()
                    && (previous.xlink.is_some() || period.href.is_some()) =>
            {
                previous.start
            }
            (None, Some(previous)) => {
                let duration = previous.duration.ok_or_else(|| {
                    DashError::MpdParsing(format!(
                        "Period {index} has no start and its predecessor no duration"
                    ))
                })?;
                previous.start + duration
            }
            (None, None) => match presentation_type {
                PresentationType::Static => Duration::ZERO,
                PresentationType::Dynamic => {
                    return Err(DashError::MpdParsing(
                        "Missing start time for initial period of a dynamic presentation"
                            .to_string(),
                    ))
                }
            },
        };

        let xlink = period.href.as_ref().map(|href| ExternalLink {
            href: href.clone(),
            on_load: period.actuate.as_deref() == Some("onLoad"),
        });

        let adaptation_sets = if xlink.is_some() && period.adaptations.is_empty() {
            Vec::new()
        } else {
            let base_url = resolve_chain(base_url, period.BaseURL.first().map(|u| u.base.as_str()))?;
            let scope = scope.nested(
                period.SegmentBase.as_ref(),
                period.SegmentList.as_ref(),
                period.SegmentTemplate.as_ref(),
            );
            period
                .adaptations
                .iter()
                .enumerate()
                .map(|(index, adaptation_set)| {
                    AdaptationSet::from_mpd(index, adaptation_set, &base_url, &scope)
                })
                .collect::<DashResult<Vec<_>>>()?
        };

        Ok(Self {
            id: period.id.clone(),
            start,
            duration: period.duration,
            adaptation_sets,
            xlink,
        })
    }

    pub fn end(&self) -> Option<Duration> {
        self.duration.map(|duration| self.start + duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Subtitle,
    Unknown,
}

impl MediaKind {
    fn detect(content_type: Option<&str>, mime_type: Option<&str>, codecs: Option<&str>) -> Self {
        match content_type {
            Some("video") => return Self::Video,
            Some("audio") => return Self::Audio,
            Some("text") => return Self::Subtitle,
            _ => {}
        }

        let is_text_codec = codecs
            .map(|codecs| codecs.starts_with("stpp") || codecs.starts_with("wvtt"))
            .unwrap_or(false);
        match mime_type {
            Some(mime) if mime.starts_with("video/") => Self::Video,
            Some(mime) if mime.starts_with("audio/") => Self::Audio,
            Some(mime) if mime.starts_with("text/") || mime == "application/ttml+xml" => {
                Self::Subtitle
            }
            Some("application/mp4") if is_text_codec => Self::Subtitle,
            _ => Self::Unknown,
        }
    }
}

/// Adaptation sets group representations that are interchangeable encodings of the same
/// content.
pub struct AdaptationSet {
    pub id: Option<String>,
    pub kind: MediaKind,
    pub lang: Option<String>,
    pub mime_type: Option<String>,
    pub segment_alignment: bool,
    pub bitstream_switching: bool,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    fn from_mpd(
        index: usize,
        adaptation_set: &dash_mpd::AdaptationSet,
        base_url: &Url,
        scope: &AddressingScope<'_>,
    ) -> DashResult<Self> {
        if adaptation_set.representations.is_empty() {
            return Err(DashError::EmptyAdaptationSet(index));
        }

        let base_url = resolve_chain(
            base_url,
            adaptation_set.BaseURL.first().map(|u| u.base.as_str()),
        )?;
        let scope = scope.nested(
            adaptation_set.SegmentBase.as_ref(),
            adaptation_set.SegmentList.as_ref(),
            adaptation_set.SegmentTemplate.as_ref(),
        );

        let representations = adaptation_set
            .representations
            .iter()
            .map(|representation| {
                Representation::from_mpd(adaptation_set, representation, &base_url, &scope)
            })
            .collect::<DashResult<Vec<_>>>()?;

        let first = adaptation_set.representations.first();
        let mime_type = adaptation_set
            .mimeType
            .clone()
            .or_else(|| first.and_then(|r| r.mimeType.clone()));
        let codecs = adaptation_set
            .codecs
            .as_deref()
            .or_else(|| first.and_then(|r| r.codecs.as_deref()));
        let content_type = adaptation_set
            .contentType
            .as_deref()
            .or_else(|| first.and_then(|r| r.contentType.as_deref()));

        Ok(Self {
            id: adaptation_set.id.as_ref().map(|id| id.to_string()),
            kind: MediaKind::detect(content_type, mime_type.as_deref(), codecs),
            lang: adaptation_set.lang.clone(),
            mime_type,
            segment_alignment: adaptation_set.segmentAlignment.unwrap_or(false),
            bitstream_switching: adaptation_set.bitstreamSwitching.unwrap_or(false),
            representations,
        })
    }
}

/// `@frameRate`, either an integer or a fraction such as `30000/1001`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Framerate {
    pub num: u64,
    pub den: u64,
}

impl Framerate {
    pub fn new(num: u64, den: u64) -> Self {
        Self { num, den: den.max(1) }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl FromStr for Framerate {
    type Err = DashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DashError::MpdParsing(format!("Invalid frame rate {s:?}"));
        let (num, den) = match s.trim().split_once('/') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (s.trim(), "1"),
        };
        let num = num.parse::<u64>().map_err(|_| invalid())?;
        let den = den.parse::<u64>().map_err(|_| invalid())?;
        if den == 0 {
            return Err(invalid());
        }
        Ok(Self { num, den })
    }
}

impl TryFrom<String> for Framerate {
    type Error = DashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Framerate> for String {
    fn from(value: Framerate) -> Self {
        value.to_string()
    }
}

impl Ord for Framerate {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as u128 * other.den as u128;
        let rhs = other.num as u128 * self.den as u128;
        lhs.cmp(&rhs)
    }
}

impl PartialOrd for Framerate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Framerate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Framerate {}

impl fmt::Display for Framerate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// One encoding of the content of an adaptation set.
pub struct Representation {
    pub id: Option<String>,
    /// Bits per second; 0 when the manifest omits it.
    pub bandwidth: u64,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub framerate: Option<Framerate>,
    pub audio_sampling_rate: Option<u32>,
    pub audio_channels: Option<u32>,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub base_url: Url,
    pub addressing: SegmentAddressing,
}

impl Representation {
    fn from_mpd(
        adaptation_set: &dash_mpd::AdaptationSet,
        representation: &dash_mpd::Representation,
        base_url: &Url,
        scope: &AddressingScope<'_>,
    ) -> DashResult<Self> {
        let base_url = resolve_chain(
            base_url,
            representation.BaseURL.first().map(|u| u.base.as_str()),
        )?;
        let scope = scope.nested(
            representation.SegmentBase.as_ref(),
            representation.SegmentList.as_ref(),
            representation.SegmentTemplate.as_ref(),
        );
        if scope.is_empty() && representation.BaseURL.is_empty() && adaptation_set.BaseURL.is_empty() {
            return Err(DashError::MpdParsing(format!(
                "Representation {:?} has no segment information",
                representation.id
            )));
        }
        let addressing = scope.resolve(&base_url)?;

        let bandwidth = representation.bandwidth.unwrap_or_else(|| {
            tracing::warn!(id = ?representation.id, "Representation without @bandwidth");
            0
        });

        let framerate = representation
            .frameRate
            .as_deref()
            .or(adaptation_set.frameRate.as_deref())
            .and_then(|framerate| match framerate.parse::<Framerate>() {
                Ok(framerate) => Some(framerate),
                Err(e) => {
                    tracing::warn!(id = ?representation.id, error = %e, "Ignoring frame rate");
                    None
                }
            });

        let audio_sampling_rate = representation
            .audioSamplingRate
            .as_ref()
            .map(|rate| rate.to_string())
            .and_then(|rate| rate.split_whitespace().next()?.parse::<u32>().ok());

        let audio_channels = representation
            .AudioChannelConfiguration
            .iter()
            .chain(adaptation_set.AudioChannelConfiguration.iter())
            .find_map(|config| config.value.as_deref()?.trim().parse::<u32>().ok());

        Ok(Self {
            id: representation.id.clone(),
            bandwidth,
            width: representation.width,
            height: representation.height,
            framerate,
            audio_sampling_rate,
            audio_channels,
            mime_type: representation
                .mimeType
                .clone()
                .or_else(|| adaptation_set.mimeType.clone()),
            codecs: representation
                .codecs
                .clone()
                .or_else(|| adaptation_set.codecs.clone()),
            base_url,
            addressing,
        })
    }
}
