//! Segment addressing schemes of a representation.
//!
//! References:
//! - [DASH-IF implementation guidelines: restricted timing model](https://dashif.org/Guidelines-TimingModel)
//! - [MPEG-DASH](https://www.mpeg.org/standards/MPEG-DASH/)

use std::time::Duration;

use dash_mpd::{Initialization, SegmentBase, SegmentList, SegmentTemplate};
use url::Url;

use super::url::{merge_baseurls, parse_media_range};
use crate::{ByteRange, DashError, DashResult};

/// The samples within a representation exist on a linear sample timeline defined
/// by the encoder that creates the samples. Sample timelines are mapped onto the
/// MPD timeline by metadata stored in or referenced by the MPD ([DASH] 7.3.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTimeline {
    /// Units per second, from `@timescale` (default 1).
    pub timescale: u64,
    /// The point on the sample timeline equivalent to the period start point, in
    /// timescale units (`@presentationTimeOffset`, default 0).
    pub presentation_time_offset: u64,
}

impl Default for SampleTimeline {
    fn default() -> Self {
        Self {
            timescale: 1,
            presentation_time_offset: 0,
        }
    }
}

/// A resolved resource, optionally restricted to a byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub url: Url,
    pub range: Option<ByteRange>,
}

pub enum SegmentAddressing {
    /// A representation that uses indexed addressing consists of a single container with an
    /// index segment, an initialization segment and the media data, all addressed by byte
    /// ranges.
    ///
    /// A representation carrying nothing but a BaseURL is addressed this way as well.
    SegmentBase(SegmentBaseInfo),
    /// Explicit list of media segment URLs.
    SegmentList(SegmentListInfo),
    /// Media segment URLs built from a template, either with a nominal `@duration`
    /// (simple addressing) or a `SegmentTimeline` (explicit addressing).
    SegmentTemplate(SegmentTemplateInfo),
}

impl SegmentAddressing {
    pub fn sample_timeline(&self) -> SampleTimeline {
        match self {
            Self::SegmentBase(base) => base.timeline,
            Self::SegmentList(list) => list.timeline,
            Self::SegmentTemplate(template) => template.timeline,
        }
    }

    pub fn availability_time_offset(&self) -> Duration {
        match self {
            Self::SegmentTemplate(template) => template.availability_time_offset,
            Self::SegmentBase(_) | Self::SegmentList(_) => Duration::ZERO,
        }
    }

    pub fn start_number(&self) -> u64 {
        match self {
            Self::SegmentBase(_) => 1,
            Self::SegmentList(list) => list.start_number,
            Self::SegmentTemplate(template) => template.start_number,
        }
    }
}

pub struct SegmentBaseInfo {
    pub timeline: SampleTimeline,
    /// The media container itself: the representation's BaseURL.
    pub media: Url,
    pub initialization: Option<ResourceRef>,
    pub index_range: Option<ByteRange>,
}

pub struct SegmentListInfo {
    pub timeline: SampleTimeline,
    /// Duration of every segment in timescale units.
    pub duration: Option<u64>,
    pub start_number: u64,
    pub initialization: Option<ResourceRef>,
    pub segments: Vec<ListSegment>,
}

pub struct ListSegment {
    pub media: ResourceRef,
    pub index: Option<ResourceRef>,
}

pub struct SegmentTemplateInfo {
    pub timeline: SampleTimeline,
    /// Media template, e.g. `$RepresentationID$/$Number%06d$.m4s`, relative to `base_url`.
    pub media: String,
    pub initialization: Option<String>,
    pub index: Option<String>,
    pub start_number: u64,
    /// Nominal segment duration in timescale units, used when there is no timeline.
    pub duration: Option<u64>,
    pub segment_timeline: Option<Vec<TimelineEntry>>,
    pub availability_time_offset: Duration,
}

/// A `SegmentTimeline/S` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineEntry {
    pub time: Option<u64>,
    pub duration: u64,
    /// Only additional segment references are counted by @r, so S@r=5 indicates a total of
    /// 6 consecutive media segments with the same duration. A negative value repeats up to
    /// the next S@t or the period end.
    pub repeat: i64,
}

/// Addressing elements visible from one level of the MPD hierarchy, innermost first.
#[derive(Clone, Default)]
pub(crate) struct AddressingScope<'a> {
    segment_base: Vec<&'a SegmentBase>,
    segment_list: Vec<&'a SegmentList>,
    segment_template: Vec<&'a SegmentTemplate>,
}

impl<'a> AddressingScope<'a> {
    /// Enters a nested level (Period, AdaptationSet or Representation). Elements of the
    /// nested level take precedence over everything inherited from above.
    pub fn nested(
        &self,
        segment_base: Option<&'a SegmentBase>,
        segment_list: Option<&'a SegmentList>,
        segment_template: Option<&'a SegmentTemplate>,
    ) -> Self {
        fn prepend<'a, T>(inner: Option<&'a T>, outer: &[&'a T]) -> Vec<&'a T> {
            inner.into_iter().chain(outer.iter().copied()).collect()
        }

        Self {
            segment_base: prepend(segment_base, &self.segment_base),
            segment_list: prepend(segment_list, &self.segment_list),
            segment_template: prepend(segment_template, &self.segment_template),
        }
    }

    /// Whether no level up to here carries any addressing element.
    pub fn is_empty(&self) -> bool {
        self.segment_base.is_empty()
            && self.segment_list.is_empty()
            && self.segment_template.is_empty()
    }

    pub fn resolve(&self, base_url: &Url) -> DashResult<SegmentAddressing> {
        if !self.segment_template.is_empty() {
            return resolve_template(&self.segment_template).map(SegmentAddressing::SegmentTemplate);
        }
        if !self.segment_list.is_empty() {
            return resolve_list(base_url, &self.segment_list).map(SegmentAddressing::SegmentList);
        }
        resolve_base(base_url, &self.segment_base).map(SegmentAddressing::SegmentBase)
    }
}

/// First value of an attribute along the inheritance chain.
fn inherited<'a, T, U, F>(chain: &[&'a T], f: F) -> Option<U>
where
    F: Fn(&'a T) -> Option<U>,
{
    chain.iter().find_map(|element| f(*element))
}

fn resolve_initialization(
    base_url: &Url,
    initialization: &Initialization,
) -> DashResult<ResourceRef> {
    let url = match initialization.sourceURL.as_deref() {
        Some(source_url) => merge_baseurls(base_url, source_url)?,
        None => base_url.clone(),
    };
    let range = initialization
        .range
        .as_deref()
        .map(parse_media_range)
        .transpose()?;
    Ok(ResourceRef { url, range })
}

fn resolve_base(base_url: &Url, chain: &[&SegmentBase]) -> DashResult<SegmentBaseInfo> {
    Ok(SegmentBaseInfo {
        timeline: SampleTimeline {
            timescale: inherited(chain, |b| b.timescale).unwrap_or(1).max(1),
            presentation_time_offset: inherited(chain, |b| b.presentationTimeOffset).unwrap_or(0),
        },
        media: base_url.clone(),
        initialization: inherited(chain, |b| b.Initialization.as_ref())
            .map(|init| resolve_initialization(base_url, init))
            .transpose()?,
        index_range: inherited(chain, |b| b.indexRange.as_deref())
            .map(parse_media_range)
            .transpose()?,
    })
}

fn resolve_list(base_url: &Url, chain: &[&SegmentList]) -> DashResult<SegmentListInfo> {
    // SegmentURL elements are never inherited piecemeal: the innermost list carrying any wins
    let segment_urls = inherited(chain, |l| {
        (!l.segment_urls.is_empty()).then_some(&l.segment_urls)
    })
    .ok_or_else(|| DashError::MpdParsing("SegmentList without SegmentURL".to_string()))?;

    let mut segments = Vec::with_capacity(segment_urls.len());
    for (idx, segment_url) in segment_urls.iter().enumerate() {
        let media = ResourceRef {
            url: match segment_url.media.as_deref() {
                Some(media) => merge_baseurls(base_url, media)?,
                None => base_url.clone(),
            },
            range: segment_url
                .mediaRange
                .as_deref()
                .map(parse_media_range)
                .transpose()?,
        };
        if segment_url.media.is_none() && media.range.is_none() {
            return Err(DashError::MpdParsing(format!(
                "SegmentURL {idx} has neither @media nor @mediaRange"
            )));
        }
        let index = match (segment_url.index.as_deref(), segment_url.indexRange.as_deref()) {
            (None, None) => None,
            (index, range) => Some(ResourceRef {
                url: match index {
                    Some(index) => merge_baseurls(base_url, index)?,
                    None => media.url.clone(),
                },
                range: range.map(parse_media_range).transpose()?,
            }),
        };
        segments.push(ListSegment { media, index });
    }

    let duration = inherited(chain, |l| l.duration).filter(|d| *d > 0);
    if segments.len() > 1 && duration.is_none() {
        return Err(DashError::MpdParsing(
            "SegmentList with several segments requires @duration".to_string(),
        ));
    }

    Ok(SegmentListInfo {
        timeline: SampleTimeline {
            timescale: inherited(chain, |l| l.timescale).unwrap_or(1).max(1),
            presentation_time_offset: 0,
        },
        duration,
        start_number: 1,
        initialization: inherited(chain, |l| l.Initialization.as_ref())
            .map(|init| resolve_initialization(base_url, init))
            .transpose()?,
        segments,
    })
}

/// Segment numbers and sample times of an explicit timeline have to fit in 64 bits.
fn check_timeline_bounds(timeline: &[TimelineEntry]) -> DashResult<()> {
    let overflow = || DashError::MpdParsing("SegmentTimeline exceeds 64-bit range".to_string());
    let mut time = 0u64;
    let mut segments = 0u64;
    for entry in timeline {
        let Ok(repeat) = u64::try_from(entry.repeat) else {
            continue;
        };
        let count = repeat.checked_add(1).ok_or_else(overflow)?;
        segments = segments.checked_add(count).ok_or_else(overflow)?;
        time = entry
            .duration
            .checked_mul(count)
            .and_then(|span| entry.time.unwrap_or(time).checked_add(span))
            .ok_or_else(overflow)?;
    }
    Ok(())
}

fn resolve_template(chain: &[&SegmentTemplate]) -> DashResult<SegmentTemplateInfo> {
    let media = inherited(chain, |t| t.media.clone()).ok_or_else(|| {
        DashError::MpdParsing("Missing media url template in representation".to_string())
    })?;

    let segment_timeline = inherited(chain, |t| t.SegmentTimeline.as_ref()).map(|timeline| {
        timeline
            .segments
            .iter()
            .map(|s| TimelineEntry {
                time: s.t,
                duration: s.d,
                repeat: s.r.unwrap_or(0),
            })
            .collect::<Vec<_>>()
    });

    let duration = inherited(chain, |t| t.duration)
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d.round() as u64);

    match (&segment_timeline, duration) {
        (Some(timeline), _) if timeline.iter().any(|s| s.duration == 0) => {
            return Err(DashError::MpdParsing(
                "SegmentTimeline entry with zero duration".to_string(),
            ))
        }
        (Some(timeline), _) => check_timeline_bounds(timeline)?,
        (None, None) => {
            return Err(DashError::MpdParsing(
                "SegmentTemplate has neither @duration nor SegmentTimeline".to_string(),
            ))
        }
        _ => {}
    }

    let availability_time_offset = inherited(chain, |t| t.availabilityTimeOffset)
        .filter(|offset| offset.is_finite() && *offset > 0.0)
        .and_then(|offset| Duration::try_from_secs_f64(offset).ok())
        .unwrap_or(Duration::ZERO);

    Ok(SegmentTemplateInfo {
        timeline: SampleTimeline {
            timescale: inherited(chain, |t| t.timescale).unwrap_or(1).max(1),
            presentation_time_offset: inherited(chain, |t| t.presentationTimeOffset)
                .unwrap_or(0),
        },
        media,
        initialization: inherited(chain, |t| t.initialization.clone()),
        index: inherited(chain, |t| t.index.clone()),
        start_number: inherited(chain, |t| t.startNumber).unwrap_or(1),
        duration,
        segment_timeline,
        availability_time_offset,
    })
}
