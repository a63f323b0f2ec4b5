//! Segment navigation within one representation of one period.
//!
//! A representation's timeline is flattened into runs of equally long segments addressed
//! by a zero based segment index. The segment number used in `$Number$` is the index plus
//! the representation's start number.
//!
//! All timestamps handed out are positions on the MPD timeline (relative to the zero
//! point of the presentation), not on the representation's sample timeline.
//!
//! References:
//! - [DASH-IF implementation guidelines: restricted timing model](https://dashif.org/Guidelines-TimingModel)

use std::time::Duration;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    manifest::{
        template::Template, url::merge_baseurls, Period, Presentation, Representation,
        ResourceRef, SegmentAddressing, TimelineEntry,
    },
    time::{duration_to_units, to_time_delta, units_to_duration},
    ByteRange, DashError, DashResult,
};

/// Duration of a single segment whose extent is not known.
const UNBOUNDED: u64 = u64::MAX / 4;

/// Outcome of moving a stream cursor by one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentAdvance {
    Advanced,
    /// The timeline of the current period is exhausted, but another period follows in
    /// the requested direction.
    EndOfPeriod,
    /// Nothing left in the requested direction.
    EndOfStream,
}

/// Everything needed to download one media segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFragment {
    pub uri: Url,
    pub range: Option<ByteRange>,
    pub index_uri: Option<Url>,
    pub index_range: Option<ByteRange>,
    pub number: u64,
    pub timestamp: Duration,
    pub duration: Duration,
}

/// An initialization or index segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFragment {
    pub uri: Url,
    pub range: Option<ByteRange>,
}

impl From<ResourceRef> for HeaderFragment {
    fn from(resource: ResourceRef) -> Self {
        Self {
            uri: resource.url,
            range: resource.range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SegmentRun {
    first_index: u64,
    /// Sample time of the first segment, in timescale units.
    start: u64,
    duration: u64,
    /// `None` repeats forever.
    count: Option<u64>,
}

impl SegmentRun {
    fn end(&self) -> Option<u64> {
        self.count
            .map(|count| self.start.saturating_add(self.duration.saturating_mul(count)))
    }

    fn last_index(&self) -> Option<u64> {
        self.count.map(|count| self.first_index + count - 1)
    }

    fn contains(&self, index: u64) -> bool {
        index >= self.first_index && self.last_index().is_none_or(|last| index <= last)
    }

    fn start_of(&self, index: u64) -> u64 {
        self.start
            .saturating_add((index - self.first_index).saturating_mul(self.duration))
    }
}

/// Position and extent of one segment on the sample timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentTime {
    pub index: u64,
    pub start: u64,
    pub duration: u64,
}

pub struct RepresentationTimeline<'a> {
    presentation: &'a Presentation,
    period: &'a Period,
    representation: &'a Representation,
    timescale: u64,
    presentation_time_offset: u64,
    runs: Vec<SegmentRun>,
}

impl<'a> RepresentationTimeline<'a> {
    pub fn new(
        presentation: &'a Presentation,
        period: &'a Period,
        representation: &'a Representation,
    ) -> Self {
        let sample_timeline = representation.addressing.sample_timeline();
        let timescale = sample_timeline.timescale;
        let pto = sample_timeline.presentation_time_offset;
        let period_end = period
            .duration
            .map(|duration| pto.saturating_add(duration_to_units(duration, timescale)));
        let period_length = period_end
            .map(|end| end - pto)
            .filter(|length| *length > 0);

        let runs = match &representation.addressing {
            SegmentAddressing::SegmentBase(_) => vec![SegmentRun {
                first_index: 0,
                start: pto,
                duration: period_length.unwrap_or(UNBOUNDED),
                count: Some(1),
            }],
            SegmentAddressing::SegmentList(list) => {
                let count = list.segments.len() as u64;
                let duration = list
                    .duration
                    .or(period_length.filter(|_| count == 1))
                    .unwrap_or(UNBOUNDED);
                single_run(pto, duration, Some(count))
            }
            SegmentAddressing::SegmentTemplate(template) => match &template.segment_timeline {
                Some(entries) => timeline_runs(entries, period_end),
                None => {
                    // checked while parsing: a template without timeline carries a duration
                    let duration = template.duration.unwrap_or(UNBOUNDED).max(1);
                    let count = period_length.map(|length| length.div_ceil(duration));
                    single_run(pto, duration, count)
                }
            },
        };

        Self {
            presentation,
            period,
            representation,
            timescale,
            presentation_time_offset: pto,
            runs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn is_open_ended(&self) -> bool {
        self.runs.last().is_some_and(|run| run.count.is_none())
    }

    pub fn first_index(&self) -> Option<u64> {
        self.runs.first().map(|run| run.first_index)
    }

    /// `None` when empty or open-ended.
    pub fn last_index(&self) -> Option<u64> {
        self.runs.last().and_then(SegmentRun::last_index)
    }

    pub fn contains(&self, index: u64) -> bool {
        self.run_of(index).is_some()
    }

    fn run_of(&self, index: u64) -> Option<&SegmentRun> {
        self.runs.iter().find(|run| run.contains(index))
    }

    pub fn segment(&self, index: u64) -> Option<SegmentTime> {
        self.run_of(index).map(|run| SegmentTime {
            index,
            start: run.start_of(index),
            duration: run.duration,
        })
    }

    /// Longest segment of the timeline, ignoring segments of unknown extent.
    pub fn max_segment_duration(&self) -> Option<Duration> {
        self.runs
            .iter()
            .map(|run| run.duration)
            .filter(|duration| *duration < UNBOUNDED)
            .max()
            .map(|duration| units_to_duration(duration, self.timescale))
    }

    pub fn presentation_time_offset(&self) -> Duration {
        units_to_duration(self.presentation_time_offset, self.timescale)
    }

    pub fn number(&self, index: u64) -> u64 {
        self.representation.addressing.start_number() + index
    }

    /// Maps a sample time onto the MPD timeline.
    fn to_presentation_time(&self, units: u64) -> Duration {
        let relative = units_to_duration(
            units.saturating_sub(self.presentation_time_offset),
            self.timescale,
        );
        self.period.start.saturating_add(relative)
    }

    fn to_sample_time(&self, timestamp: Duration) -> u64 {
        let relative = timestamp.saturating_sub(self.period.start);
        self.presentation_time_offset
            .saturating_add(duration_to_units(relative, self.timescale))
    }

    pub fn timestamp(&self, index: u64) -> Option<Duration> {
        self.segment(index)
            .map(|segment| self.to_presentation_time(segment.start))
    }

    pub fn timestamp_end(&self, index: u64) -> Option<Duration> {
        self.segment(index).map(|segment| {
            self.to_presentation_time(segment.start.saturating_add(segment.duration))
        })
    }

    pub fn duration(&self, index: u64) -> Option<Duration> {
        self.segment(index)
            .map(|segment| units_to_duration(segment.duration, self.timescale))
    }

    /// Finds the segment to play at `timestamp`.
    ///
    /// A timestamp on a boundary selects the segment starting there. One that falls into a
    /// gap selects the following segment when seeking forward and the preceding one when
    /// seeking backward. Timestamps before the first segment select the first; timestamps
    /// past the last select the last when seeking backward and fail otherwise.
    pub fn seek(&self, timestamp: Duration, forward: bool) -> DashResult<u64> {
        let first = self.runs.first().ok_or(DashError::SegmentOutOfRange)?;
        let target = self.to_sample_time(timestamp);
        if timestamp < self.period.start || target < first.start {
            return Ok(first.first_index);
        }

        let mut previous: Option<&SegmentRun> = None;
        for run in &self.runs {
            if target < run.start {
                // gap between two runs
                return Ok(match (forward, previous.and_then(SegmentRun::last_index)) {
                    (false, Some(last)) => last,
                    _ => run.first_index,
                });
            }
            if run.end().is_none_or(|end| target < end) {
                return Ok(run.first_index + (target - run.start) / run.duration);
            }
            previous = Some(run);
        }

        match (forward, self.last_index()) {
            (false, Some(last)) => Ok(last),
            _ => Err(DashError::SegmentOutOfRange),
        }
    }

    fn availability_time_offset(&self) -> Duration {
        self.representation.addressing.availability_time_offset()
    }

    /// Wall clock time at which the segment becomes available. `None` for static
    /// presentations, where everything is available right away.
    pub fn availability_start_time(&self, index: u64) -> Option<DateTime<Utc>> {
        if self.presentation.is_static() {
            return None;
        }
        let availability_start_time = self.presentation.availability_start_time?;
        let end = self.timestamp_end(index)?;
        availability_start_time
            .checked_add_signed(to_time_delta(end))?
            .checked_sub_signed(to_time_delta(self.availability_time_offset()))
    }

    pub fn check_available(&self, index: u64, now: DateTime<Utc>) -> DashResult<()> {
        match self.availability_start_time(index) {
            Some(at) if at > now => Err(DashError::SegmentNotAvailable(at)),
            _ => Ok(()),
        }
    }

    /// Last segment downloadable at `now`. Static presentations report their last segment.
    pub fn last_available_index(&self, now: DateTime<Utc>) -> Option<u64> {
        if self.presentation.is_static() {
            return self.last_index();
        }
        let Some(availability_start_time) = self.presentation.availability_start_time else {
            return self.last_index();
        };

        let elapsed = (now - availability_start_time
            + to_time_delta(self.availability_time_offset()))
        .to_std()
        .ok()?;
        if elapsed < self.period.start {
            return None;
        }
        // sample time up to which segments have been completely published
        let limit = self.to_sample_time(elapsed);

        let mut last = None;
        for run in &self.runs {
            if run.start.saturating_add(run.duration) > limit {
                break;
            }
            let complete = (limit - run.start) / run.duration;
            let complete = run.count.map_or(complete, |count| complete.min(count));
            last = Some(run.first_index + complete - 1);
            if run.count.is_none_or(|count| complete < count) {
                break;
            }
        }
        last
    }

    fn template(&self) -> Template<'static> {
        let mut template = Template::new();
        template
            .insert_optional(Template::REPRESENTATION_ID, self.representation.id.clone())
            .insert(
                Template::BANDWIDTH,
                self.representation.bandwidth.to_string(),
            );
        template
    }

    pub fn media_fragment(&self, index: u64, now: DateTime<Utc>) -> DashResult<MediaFragment> {
        let segment = self.segment(index).ok_or(DashError::SegmentOutOfRange)?;
        self.check_available(index, now)?;

        let number = self.number(index);
        let base_url = &self.representation.base_url;
        let (uri, range, index_ref) = match &self.representation.addressing {
            SegmentAddressing::SegmentBase(base) => (
                base.media.clone(),
                None,
                base.index_range.map(|range| ResourceRef {
                    url: base.media.clone(),
                    range: Some(range),
                }),
            ),
            SegmentAddressing::SegmentList(list) => {
                let list_segment = usize::try_from(index)
                    .ok()
                    .and_then(|index| list.segments.get(index))
                    .ok_or(DashError::SegmentOutOfRange)?;
                (
                    list_segment.media.url.clone(),
                    list_segment.media.range,
                    list_segment.index.clone(),
                )
            }
            SegmentAddressing::SegmentTemplate(info) => {
                let mut template = self.template();
                template
                    .insert(Template::NUMBER, number.to_string())
                    .insert(Template::TIME, segment.start.to_string());
                let uri = merge_baseurls(base_url, &template.resolve(&info.media))?;
                let index_ref = info
                    .index
                    .as_deref()
                    .map(|index| -> DashResult<_> {
                        Ok(ResourceRef {
                            url: merge_baseurls(base_url, &template.resolve(index))?,
                            range: None,
                        })
                    })
                    .transpose()?;
                (uri, None, index_ref)
            }
        };

        let (index_uri, index_range) = match index_ref {
            Some(ResourceRef { url, range }) => (Some(url), range),
            None => (None, None),
        };

        Ok(MediaFragment {
            uri,
            range,
            index_uri,
            index_range,
            number,
            timestamp: self.to_presentation_time(segment.start),
            duration: units_to_duration(segment.duration, self.timescale),
        })
    }

    /// The initialization segment, if the representation has one.
    pub fn header(&self) -> DashResult<Option<HeaderFragment>> {
        let base_url = &self.representation.base_url;
        Ok(match &self.representation.addressing {
            SegmentAddressing::SegmentBase(base) => match (&base.initialization, base.index_range) {
                (Some(initialization), _) => Some(initialization.clone().into()),
                // without an Initialization element the header precedes the index
                (None, Some(index_range)) if index_range.offset > 0 => Some(HeaderFragment {
                    uri: base.media.clone(),
                    range: Some(ByteRange::new(0, Some(index_range.offset))),
                }),
                (None, _) => None,
            },
            SegmentAddressing::SegmentList(list) => {
                list.initialization.clone().map(HeaderFragment::from)
            }
            SegmentAddressing::SegmentTemplate(info) => info
                .initialization
                .as_deref()
                .map(|initialization| -> DashResult<_> {
                    Ok(HeaderFragment {
                        uri: merge_baseurls(base_url, &self.template().resolve(initialization))?,
                        range: None,
                    })
                })
                .transpose()?,
        })
    }

    /// The index segment, if the representation has one.
    pub fn header_index(&self) -> DashResult<Option<HeaderFragment>> {
        let base_url = &self.representation.base_url;
        Ok(match &self.representation.addressing {
            SegmentAddressing::SegmentBase(base) => {
                base.index_range.map(|range| HeaderFragment {
                    uri: base.media.clone(),
                    range: Some(range),
                })
            }
            SegmentAddressing::SegmentList(_) => None,
            SegmentAddressing::SegmentTemplate(info) => info
                .index
                .as_deref()
                .filter(|index| !index.contains("$Number") && !index.contains("$Time"))
                .map(|index| -> DashResult<_> {
                    Ok(HeaderFragment {
                        uri: merge_baseurls(base_url, &self.template().resolve(index))?,
                        range: None,
                    })
                })
                .transpose()?,
        })
    }
}

fn single_run(start: u64, duration: u64, count: Option<u64>) -> Vec<SegmentRun> {
    if count == Some(0) {
        return Vec::new();
    }
    vec![SegmentRun {
        first_index: 0,
        start,
        duration,
        count,
    }]
}

/// Expands `SegmentTimeline/S` elements into runs.
///
/// A negative `@r` repeats up to the next `S@t`, or up to the period end for the last
/// element. Without either, the run is open-ended and terminates the timeline.
fn timeline_runs(entries: &[TimelineEntry], period_end: Option<u64>) -> Vec<SegmentRun> {
    let mut runs = Vec::with_capacity(entries.len());
    let mut time = 0u64;
    let mut index = 0u64;

    for (position, entry) in entries.iter().enumerate() {
        if let Some(t) = entry.time {
            time = t;
        }
        let count = match u64::try_from(entry.repeat) {
            Ok(repeat) => Some(repeat + 1),
            Err(_) => entries
                .get(position + 1)
                .and_then(|next| next.time)
                .or(period_end)
                .map(|limit| limit.saturating_sub(time).div_ceil(entry.duration)),
        };

        match count {
            Some(0) => continue,
            Some(count) => {
                runs.push(SegmentRun {
                    first_index: index,
                    start: time,
                    duration: entry.duration,
                    count: Some(count),
                });
                index = index.saturating_add(count);
                time = time.saturating_add(entry.duration.saturating_mul(count));
            }
            None => {
                runs.push(SegmentRun {
                    first_index: index,
                    start: time,
                    duration: entry.duration,
                    count: None,
                });
                break;
            }
        }
    }

    runs
}
