//! The MPD client: owns the current presentation and the streams selected for playback.
//!
//! All state lives behind a single mutex. Network transfers happen outside of it, after
//! which the new presentation is swapped in as one `Arc` replacement.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use url::Url;

use crate::{
    clock::{get_utc_timing_sources, Clock, UtcTimingMethod},
    manifest::{url::merge_baseurls, AdaptationSet, MediaKind, Period, Presentation},
    navigator::{HeaderFragment, MediaFragment, RepresentationTimeline, SegmentAdvance},
    options::ClientOptions,
    profile::{check_profiles, Profiles},
    selector::select_representation,
    stream::{ActiveStream, MediaParameters, SegmentCursor},
    DashError, DashResult, Downloader,
};

/// `xlink:href` value asking for the element to be removed.
const RESOLVE_TO_ZERO: &str = "urn:mpeg:dash:resolve-to-zero:2013";

/// Period of the current presentation, as seen by the streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPeriod {
    pub index: usize,
    pub id: Option<String>,
    pub start: Duration,
    pub duration: Option<Duration>,
}

/// Read-only summary of an adaptation set of the current period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptationSetSummary {
    pub index: usize,
    pub id: Option<String>,
    pub kind: MediaKind,
    pub lang: Option<String>,
    pub mime_type: Option<String>,
    pub representations: usize,
}

#[derive(Default)]
struct ClientState {
    presentation: Option<Arc<Presentation>>,
    /// Bumped on every presentation swap.
    generation: u64,
    periods: Vec<StreamPeriod>,
    period_index: usize,
    active_streams: Vec<ActiveStream>,
    mpd_uri: Option<Url>,
    mpd_base_uri: Option<Url>,
    update_failed_count: u32,
    profiles: Profiles,
    clock: Clock,
}

impl ClientState {
    fn presentation(&self) -> DashResult<Arc<Presentation>> {
        self.presentation.clone().ok_or(DashError::NoManifest)
    }

    fn stream(&self, stream: usize) -> DashResult<&ActiveStream> {
        let active = self
            .active_streams
            .get(stream)
            .ok_or(DashError::StreamIndexOutOfRange(stream))?;
        if active.generation != self.generation {
            return Err(DashError::StaleStream(stream));
        }
        Ok(active)
    }

    fn set_cursor(&mut self, stream: usize, cursor: SegmentCursor) {
        if let Some(active) = self.active_streams.get_mut(stream) {
            tracing::debug!(stream, ?cursor, "Cursor moved");
            active.cursor = cursor;
        }
    }

    fn has_next_period(&self) -> bool {
        self.period_index + 1 < self.periods.len()
    }

    fn has_previous_period(&self) -> bool {
        self.presentation.is_some() && self.period_index > 0
    }

    fn end_signal(&self, forward: bool) -> SegmentAdvance {
        let adjacent = if forward {
            self.has_next_period()
        } else {
            self.has_previous_period()
        };
        if adjacent {
            SegmentAdvance::EndOfPeriod
        } else {
            SegmentAdvance::EndOfStream
        }
    }

    fn switch_period(&mut self, period_index: usize) {
        self.active_streams.clear();
        self.period_index = period_index;
        tracing::debug!(period_index, "Active period changed");
    }

    /// Installs a presentation and rebases the active streams onto it. Streams that cannot
    /// be carried over are dropped altogether.
    fn swap(&mut self, presentation: Presentation) {
        let generation = self.generation + 1;
        let rebased = self.presentation.as_ref().and_then(|old| {
            rebase(
                old,
                self.period_index,
                &self.active_streams,
                &presentation,
                generation,
            )
        });

        let (period_index, active_streams) = rebased.unwrap_or_else(|| {
            if !self.active_streams.is_empty() {
                tracing::warn!("Active streams could not be carried over to the new manifest");
            }
            let start = self
                .periods
                .get(self.period_index)
                .map(|period| period.start)
                .unwrap_or_default();
            (presentation.period_index_at(start), Vec::new())
        });

        self.periods = presentation
            .periods
            .iter()
            .enumerate()
            .map(|(index, period)| StreamPeriod {
                index,
                id: period.id.clone(),
                start: period.start,
                duration: period.duration,
            })
            .collect();
        self.profiles = check_profiles(&presentation);
        self.period_index = period_index;
        self.active_streams = active_streams;
        self.generation = generation;
        self.presentation = Some(Arc::new(presentation));
        tracing::info!(generation, period_index, "Presentation swapped");
    }
}

/// Carries streams over to a replacing presentation: same period, adaptation set and
/// representation (by id when there is one, by position otherwise), re-seeked to the
/// timestamp they were at.
fn rebase(
    old: &Presentation,
    old_period_index: usize,
    streams: &[ActiveStream],
    new: &Presentation,
    generation: u64,
) -> Option<(usize, Vec<ActiveStream>)> {
    let old_period = old.periods.get(old_period_index)?;
    let period_index = match &old_period.id {
        Some(id) => new.period_index_by_id(id)?,
        None => Some(old_period_index)
            .filter(|index| *index < new.periods.len())
            .unwrap_or_else(|| new.period_index_at(old_period.start)),
    };
    let new_period = new.periods.get(period_index)?;

    let mut rebased = Vec::with_capacity(streams.len());
    for stream in streams {
        let old_set = stream.adaptation_set(old_period)?;
        let old_representation = stream.representation(old_period)?;

        let adaptation_set = match &old_set.id {
            Some(id) => new_period
                .adaptation_sets
                .iter()
                .position(|set| set.id.as_ref() == Some(id))?,
            None => stream.adaptation_set,
        };
        let new_set = new_period.adaptation_sets.get(adaptation_set)?;
        let representation = match &old_representation.id {
            Some(id) => new_set
                .representations
                .iter()
                .position(|r| r.id.as_ref() == Some(id))?,
            None => stream.representation,
        };

        let mut active = ActiveStream::new(new_period, adaptation_set, representation, generation)?;
        active.cursor = match stream.cursor {
            SegmentCursor::At(index) => {
                let timestamp =
                    RepresentationTimeline::new(old, old_period, old_representation).timestamp(index)?;
                let timeline =
                    RepresentationTimeline::new(new, new_period, active.representation(new_period)?);
                SegmentCursor::At(timeline.seek(timestamp, true).ok()?)
            }
            cursor => cursor,
        };
        rebased.push(active);
    }

    tracing::debug!(streams = rebased.len(), period_index, "Rebased active streams");
    Some((period_index, rebased))
}

pub struct MpdClient<D> {
    downloader: D,
    options: ClientOptions,
    state: Mutex<ClientState>,
}

impl<D> MpdClient<D>
where
    D: Downloader,
{
    pub fn new(downloader: D, options: ClientOptions) -> Self {
        Self {
            downloader,
            options,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the manifest location used by [`MpdClient::parse`] and [`MpdClient::refresh`].
    pub fn set_mpd_uri(&self, uri: Url) {
        let mut state = self.state();
        state.mpd_base_uri = Some(uri.clone());
        state.mpd_uri = Some(uri);
    }

    /// Overrides the URL relative references are resolved against, e.g. after a redirect.
    pub fn set_mpd_base_uri(&self, uri: Url) {
        self.state().mpd_base_uri = Some(uri);
    }

    /// Parses a manifest and makes it the current presentation. On failure the client is
    /// left untouched.
    pub fn parse(&self, data: &[u8]) -> DashResult<()> {
        let base_uri = {
            let state = self.state();
            state
                .mpd_base_uri
                .clone()
                .or_else(|| state.mpd_uri.clone())
                .ok_or_else(|| DashError::MpdParsing("No manifest URI set".to_string()))?
        };
        let presentation = Presentation::parse(data, &base_uri)?;
        self.install(presentation);
        Ok(())
    }

    /// Fetches and parses the manifest at `uri`. Relative references resolve against the
    /// URL the manifest was eventually served from.
    pub async fn load(&self, uri: Url) -> DashResult<()> {
        let fetched = self.downloader.fetch(&uri, None).await?;
        let presentation = Presentation::parse(&fetched.data, &fetched.url)?;

        tracing::info!(%uri, location = %fetched.url, periods = presentation.periods.len(), "Loaded MPD");
        {
            let mut state = self.state();
            state.mpd_uri = Some(uri);
            state.mpd_base_uri = Some(fetched.url);
        }
        self.install(presentation);
        Ok(())
    }

    fn install(&self, presentation: Presentation) {
        let mut state = self.state();
        state.presentation = None;
        state.periods.clear();
        state.active_streams.clear();
        state.period_index = 0;
        state.update_failed_count = 0;
        state.swap(presentation);
    }

    /// Releases the presentation and every active stream.
    pub fn destroy(&self) {
        let mut state = self.state();
        *state = ClientState::default();
        tracing::debug!("Client destroyed");
    }

    pub fn presentation(&self) -> Option<Arc<Presentation>> {
        self.state().presentation.clone()
    }

    pub fn check_profiles(&self) -> DashResult<Profiles> {
        let state = self.state();
        state.presentation()?;
        Ok(state.profiles)
    }

    pub fn has_isoff_ondemand_profile(&self) -> bool {
        self.state().profiles.isoff_on_demand
    }

    /// Fetches the manifest again and swaps it in.
    ///
    /// Failures leave the current presentation in place. A result that arrives after another
    /// manifest was installed is dropped. Once `max_update_failures`
    /// consecutive refreshes failed, [`DashError::RefreshFailed`] is returned instead of the
    /// underlying error.
    pub async fn refresh(&self) -> DashResult<()> {
        let (uri, generation) = {
            let state = self.state();
            (state.mpd_uri.clone().ok_or(DashError::NoManifest)?, state.generation)
        };

        let result = match self.downloader.fetch(&uri, None).await {
            Ok(fetched) => Presentation::parse(&fetched.data, &fetched.url).map(|p| (p, fetched.url)),
            Err(e) => Err(e),
        };

        let mut state = self.state();
        if state.generation != generation || state.mpd_uri.as_ref() != Some(&uri) {
            tracing::warn!(%uri, "Manifest replaced during refresh, discarding");
            return Ok(());
        }
        match result {
            Ok((presentation, location)) => {
                state.update_failed_count = 0;
                state.mpd_base_uri = Some(location);
                state.swap(presentation);
                Ok(())
            }
            Err(e) => {
                let max = self.options.max_update_failures;
                state.update_failed_count = (state.update_failed_count + 1).min(max.max(1));
                let attempts = state.update_failed_count;
                if attempts >= max {
                    tracing::error!(attempts, max, error = %e, "Giving up on manifest refresh");
                    Err(DashError::RefreshFailed { attempts, max })
                } else {
                    tracing::warn!(attempts, max, error = %e, "Manifest refresh failed");
                    Err(e)
                }
            }
        }
    }

    /// Replaces periods declared with `xlink:actuate="onLoad"` by the remote content.
    pub async fn fetch_on_load_external_resources(&self) -> DashResult<()> {
        let (presentation, generation) = {
            let state = self.state();
            (state.presentation()?, state.generation)
        };

        let pending: Vec<(usize, String)> = presentation
            .pending_external_periods()
            .map(|(index, link)| (index, link.href.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        let mut mpd = presentation.mpd().clone();
        // splice back to front so that earlier indices stay valid
        for (index, href) in pending.into_iter().rev() {
            let periods = if href == RESOLVE_TO_ZERO {
                Vec::new()
            } else {
                let url = merge_baseurls(&presentation.base_url, &href)?;
                let fetched = self.downloader.fetch(&url, None).await?;
                tracing::debug!(%url, index, "Fetched external period");
                parse_remote_periods(&fetched.data)?
            };
            mpd.periods.splice(index..=index, periods);
        }

        let resolved = Presentation::from_mpd(mpd, &presentation.location)?;
        let mut state = self.state();
        if state.generation != generation {
            tracing::warn!("Manifest changed while resolving external periods, discarding");
            return Ok(());
        }
        state.swap(resolved);
        Ok(())
    }

    /// Synchronises the client clock with the UTC timing sources of the manifest.
    pub async fn sync_clock(&self) -> DashResult<()> {
        let (timings, mut clock) = {
            let state = self.state();
            (state.presentation()?.utc_timings.clone(), state.clock)
        };
        clock
            .sync(&timings, &self.downloader, self.options.utc_timing_methods)
            .await?;
        self.state().clock = clock;
        Ok(())
    }

    /// Current wall clock time, corrected by the last clock synchronisation.
    pub fn now(&self) -> DateTime<Utc> {
        self.state().clock.now()
    }

    // Periods

    /// Selects the active period by id, index or time, in that order of precedence.
    /// Without any of them the first period is selected.
    pub fn setup_media_presentation(
        &self,
        time: Option<Duration>,
        period_index: Option<usize>,
        period_id: Option<&str>,
    ) -> DashResult<()> {
        let mut state = self.state();
        let presentation = state.presentation()?;
        let index = match (period_id, period_index, time) {
            (Some(id), _, _) => presentation
                .period_index_by_id(id)
                .ok_or_else(|| DashError::PeriodIdNotFound(id.to_string()))?,
            (None, Some(index), _) if index < presentation.periods.len() => index,
            (None, Some(index), _) => return Err(DashError::PeriodIndexOutOfRange(index)),
            (None, None, Some(time)) => presentation.period_index_at(time),
            (None, None, None) => 0,
        };
        state.switch_period(index);
        Ok(())
    }

    pub fn periods(&self) -> Vec<StreamPeriod> {
        self.state().periods.clone()
    }

    pub fn get_period_index_at_time(&self, time: Duration) -> DashResult<usize> {
        Ok(self.state().presentation()?.period_index_at(time))
    }

    pub fn set_period_index(&self, period_index: usize) -> DashResult<()> {
        let mut state = self.state();
        state.presentation()?;
        if period_index >= state.periods.len() {
            return Err(DashError::PeriodIndexOutOfRange(period_index));
        }
        state.switch_period(period_index);
        Ok(())
    }

    pub fn set_period_id(&self, period_id: &str) -> DashResult<()> {
        let mut state = self.state();
        let index = state
            .periods
            .iter()
            .position(|period| period.id.as_deref() == Some(period_id))
            .ok_or_else(|| DashError::PeriodIdNotFound(period_id.to_string()))?;
        state.switch_period(index);
        Ok(())
    }

    pub fn period_index(&self) -> usize {
        self.state().period_index
    }

    pub fn period_id(&self) -> DashResult<Option<String>> {
        let state = self.state();
        state.presentation()?;
        Ok(state
            .periods
            .get(state.period_index)
            .and_then(|period| period.id.clone()))
    }

    pub fn period_start_time(&self) -> DashResult<Duration> {
        let state = self.state();
        state
            .periods
            .get(state.period_index)
            .map(|period| period.start)
            .ok_or(DashError::NoManifest)
    }

    pub fn has_next_period(&self) -> bool {
        self.state().has_next_period()
    }

    pub fn has_previous_period(&self) -> bool {
        self.state().has_previous_period()
    }

    // Streams

    /// Activates an adaptation set of the current period with its startup representation.
    /// Returns the index of the new stream.
    pub fn setup_streaming(&self, adaptation_set: usize) -> DashResult<usize> {
        let mut state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let set = period
            .adaptation_sets
            .get(adaptation_set)
            .ok_or(DashError::AdaptationSetIndexOutOfRange(adaptation_set))?;
        let representation = select_representation(&set.representations, &self.options.ceilings)?;

        let active = ActiveStream::new(period, adaptation_set, representation, state.generation)
            .ok_or(DashError::RepresentationIndexOutOfRange(representation))?;
        state.active_streams.push(active);

        let stream = state.active_streams.len() - 1;
        tracing::debug!(
            stream,
            adaptation_set,
            representation,
            bandwidth = set.representations[representation].bandwidth,
            "Stream activated"
        );
        Ok(stream)
    }

    /// Replaces the active streams by one stream per adaptation set of the requested kinds,
    /// in document order. Returns the number of streams.
    pub fn setup_streams(&self, kinds: &[MediaKind]) -> DashResult<usize> {
        let selected: Vec<usize> = {
            let mut state = self.state();
            let presentation = state.presentation()?;
            state.active_streams.clear();
            presentation.periods[state.period_index]
                .adaptation_sets
                .iter()
                .enumerate()
                .filter(|(_, set)| kinds.contains(&set.kind))
                .map(|(index, _)| index)
                .collect()
        };

        for adaptation_set in selected {
            self.setup_streaming(adaptation_set)?;
        }
        Ok(self.stream_count())
    }

    /// Switches a stream to another representation of its adaptation set.
    ///
    /// The cursor is kept when the new representation has the same segment starting at the
    /// same time, and re-seeked to the current timestamp otherwise.
    pub fn setup_representation(&self, stream: usize, representation: usize) -> DashResult<()> {
        let mut state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let active = state.stream(stream)?.clone();
        let set = active
            .adaptation_set(period)
            .ok_or(DashError::AdaptationSetIndexOutOfRange(active.adaptation_set))?;
        let new_representation = set
            .representations
            .get(representation)
            .ok_or(DashError::RepresentationIndexOutOfRange(representation))?;

        let cursor = match active.cursor {
            SegmentCursor::At(index) => {
                let old_representation = active
                    .representation(period)
                    .ok_or(DashError::RepresentationIndexOutOfRange(active.representation))?;
                let old = RepresentationTimeline::new(&presentation, period, old_representation);
                let new = RepresentationTimeline::new(&presentation, period, new_representation);
                let timestamp = old.timestamp(index).ok_or(DashError::SegmentOutOfRange)?;
                if new.timestamp(index) == Some(timestamp) {
                    SegmentCursor::At(index)
                } else {
                    tracing::debug!(stream, ?timestamp, "Representations not aligned, seeking");
                    SegmentCursor::At(new.seek(timestamp, true)?)
                }
            }
            cursor => cursor,
        };

        if let Some(active) = state.active_streams.get_mut(stream) {
            active.representation = representation;
            active.cursor = cursor;
        }
        tracing::debug!(
            stream,
            representation,
            bandwidth = new_representation.bandwidth,
            "Representation switched"
        );
        Ok(())
    }

    pub fn deactivate_all(&self) {
        self.state().active_streams.clear();
    }

    pub fn stream_count(&self) -> usize {
        self.state().active_streams.len()
    }

    pub fn active_stream(&self, stream: usize) -> DashResult<ActiveStream> {
        self.state().stream(stream).cloned()
    }

    fn with_stream<T, F>(&self, stream: usize, f: F) -> DashResult<T>
    where
        F: FnOnce(&ActiveStream, &AdaptationSet, RepresentationTimeline<'_>) -> DashResult<T>,
    {
        let state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let active = state.stream(stream)?;
        let set = active
            .adaptation_set(period)
            .ok_or(DashError::AdaptationSetIndexOutOfRange(active.adaptation_set))?;
        let representation = active
            .representation(period)
            .ok_or(DashError::RepresentationIndexOutOfRange(active.representation))?;
        f(
            active,
            set,
            RepresentationTimeline::new(&presentation, period, representation),
        )
    }

    pub fn media_parameters(&self, stream: usize) -> DashResult<MediaParameters> {
        let state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let active = state.stream(stream)?;
        match (active.adaptation_set(period), active.representation(period)) {
            (Some(set), Some(representation)) => Ok(MediaParameters::new(set, representation)),
            _ => Err(DashError::StaleStream(stream)),
        }
    }

    pub fn contains_subtitles(&self, stream: usize) -> DashResult<bool> {
        self.with_stream(stream, |_, set, _| Ok(set.kind == MediaKind::Subtitle))
    }

    pub fn bitstream_switching(&self, stream: usize) -> DashResult<bool> {
        self.with_stream(stream, |_, set, _| Ok(set.bitstream_switching))
    }

    pub fn requires_index_segment(&self, stream: usize) -> DashResult<bool> {
        let state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let representation = state
            .stream(stream)?
            .representation(period)
            .ok_or(DashError::StaleStream(stream))?;
        Ok(state.profiles.requires_index_segment(representation))
    }

    /// Languages of the audio adaptation sets of the current period, in document order.
    pub fn audio_languages(&self) -> Vec<String> {
        let state = self.state();
        let Some(presentation) = &state.presentation else {
            return Vec::new();
        };
        let mut languages: Vec<String> = Vec::new();
        for set in &presentation.periods[state.period_index].adaptation_sets {
            if let (MediaKind::Audio, Some(lang)) = (set.kind, &set.lang) {
                if !languages.contains(lang) {
                    languages.push(lang.clone());
                }
            }
        }
        languages
    }

    pub fn adaptation_set_count(&self) -> DashResult<usize> {
        let state = self.state();
        Ok(state.presentation()?.periods[state.period_index]
            .adaptation_sets
            .len())
    }

    pub fn adaptation_sets(&self) -> DashResult<Vec<AdaptationSetSummary>> {
        let state = self.state();
        let presentation = state.presentation()?;
        Ok(presentation.periods[state.period_index]
            .adaptation_sets
            .iter()
            .enumerate()
            .map(|(index, set)| AdaptationSetSummary {
                index,
                id: set.id.clone(),
                kind: set.kind,
                lang: set.lang.clone(),
                mime_type: set.mime_type.clone(),
                representations: set.representations.len(),
            })
            .collect())
    }

    // Navigation

    /// Moves every stream to the first segment of the current period.
    pub fn seek_to_first_segment(&self) -> DashResult<()> {
        let mut state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];

        let cursors: Vec<SegmentCursor> = state
            .active_streams
            .iter()
            .map(|active| {
                active
                    .representation(period)
                    .map(|representation| {
                        RepresentationTimeline::new(&presentation, period, representation)
                    })
                    .and_then(|timeline| timeline.first_index())
                    .map_or(SegmentCursor::PastEnd, SegmentCursor::At)
            })
            .collect();
        for (stream, cursor) in cursors.into_iter().enumerate() {
            state.set_cursor(stream, cursor);
        }
        Ok(())
    }

    /// Whether `advance_segment` would move the stream. Unpositioned streams cannot advance.
    pub fn has_next_segment(&self, stream: usize, forward: bool) -> DashResult<bool> {
        let state = self.state();
        if state.stream(stream)?.cursor == SegmentCursor::Unpositioned {
            return Ok(false);
        }
        let adjacent = if forward {
            state.has_next_period()
        } else {
            state.has_previous_period()
        };
        self.with_stream_in(&state, stream, |active, timeline| {
            let within = match (active.cursor, forward) {
                (SegmentCursor::At(index), true) => timeline.contains(index + 1),
                (SegmentCursor::At(index), false) => index > 0 && timeline.contains(index - 1),
                (SegmentCursor::Unpositioned, _) => false,
                (SegmentCursor::PastEnd, false) | (SegmentCursor::BeforeStart, true) => {
                    !timeline.is_empty()
                }
                (SegmentCursor::PastEnd, true) | (SegmentCursor::BeforeStart, false) => false,
            };
            Ok(within || adjacent)
        })
    }

    fn with_stream_in<T, F>(&self, state: &ClientState, stream: usize, f: F) -> DashResult<T>
    where
        F: FnOnce(&ActiveStream, RepresentationTimeline<'_>) -> DashResult<T>,
    {
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        let active = state.stream(stream)?;
        let representation = active
            .representation(period)
            .ok_or(DashError::StaleStream(stream))?;
        f(
            active,
            RepresentationTimeline::new(&presentation, period, representation),
        )
    }

    /// Moves a stream by one segment. Running off the timeline is reported through
    /// [`SegmentAdvance`], leaving period changes to the caller.
    pub fn advance_segment(&self, stream: usize, forward: bool) -> DashResult<SegmentAdvance> {
        let mut state = self.state();
        let cursor = self.with_stream_in(&state, stream, |active, timeline| {
            Ok(match (active.cursor, forward) {
                (SegmentCursor::Unpositioned, _) => {
                    return Err(DashError::StreamNotPositioned(stream))
                }
                (SegmentCursor::At(index), true) if timeline.contains(index + 1) => {
                    Some(SegmentCursor::At(index + 1))
                }
                (SegmentCursor::At(index), false) if index > 0 && timeline.contains(index - 1) => {
                    Some(SegmentCursor::At(index - 1))
                }
                (SegmentCursor::At(_), true) => None,
                (SegmentCursor::At(_), false) => None,
                (SegmentCursor::BeforeStart, true) => timeline.first_index().map(SegmentCursor::At),
                (SegmentCursor::PastEnd, false) => timeline.last_index().map(SegmentCursor::At),
                (SegmentCursor::BeforeStart, false) | (SegmentCursor::PastEnd, true) => None,
            })
        })?;

        match cursor {
            Some(cursor) => {
                state.set_cursor(stream, cursor);
                Ok(SegmentAdvance::Advanced)
            }
            None => {
                let edge = if forward {
                    SegmentCursor::PastEnd
                } else {
                    SegmentCursor::BeforeStart
                };
                state.set_cursor(stream, edge);
                Ok(state.end_signal(forward))
            }
        }
    }

    fn current_index(active: &ActiveStream, stream: usize) -> DashResult<u64> {
        match active.cursor {
            SegmentCursor::At(index) => Ok(index),
            SegmentCursor::Unpositioned => Err(DashError::StreamNotPositioned(stream)),
            SegmentCursor::PastEnd | SegmentCursor::BeforeStart => {
                Err(DashError::SegmentOutOfRange)
            }
        }
    }

    /// Resolves the current segment of a stream. The cursor does not move.
    pub fn get_next_fragment(&self, stream: usize) -> DashResult<MediaFragment> {
        let state = self.state();
        let now = state.clock.now();
        self.with_stream_in(&state, stream, |active, timeline| {
            timeline.media_fragment(Self::current_index(active, stream)?, now)
        })
    }

    pub fn get_next_fragment_duration(&self, stream: usize) -> DashResult<Duration> {
        let state = self.state();
        self.with_stream_in(&state, stream, |active, timeline| {
            timeline
                .duration(Self::current_index(active, stream)?)
                .ok_or(DashError::SegmentOutOfRange)
        })
    }

    pub fn get_next_fragment_timestamp(&self, stream: usize) -> DashResult<Duration> {
        let state = self.state();
        self.with_stream_in(&state, stream, |active, timeline| {
            timeline
                .timestamp(Self::current_index(active, stream)?)
                .ok_or(DashError::SegmentOutOfRange)
        })
    }

    /// End of the last segment of the stream, or of the last available one for a live
    /// timeline without end.
    pub fn get_last_fragment_timestamp_end(&self, stream: usize) -> DashResult<Duration> {
        let state = self.state();
        let now = state.clock.now();
        self.with_stream_in(&state, stream, |_, timeline| {
            let last = if timeline.is_open_ended() {
                timeline.last_available_index(now)
            } else {
                timeline.last_index()
            };
            last.and_then(|index| timeline.timestamp_end(index))
                .ok_or(DashError::SegmentOutOfRange)
        })
    }

    pub fn get_next_header(&self, stream: usize) -> DashResult<Option<HeaderFragment>> {
        let state = self.state();
        self.with_stream_in(&state, stream, |_, timeline| timeline.header())
    }

    pub fn get_next_header_index(&self, stream: usize) -> DashResult<Option<HeaderFragment>> {
        let state = self.state();
        self.with_stream_in(&state, stream, |_, timeline| timeline.header_index())
    }

    /// Positions a stream on the segment to play at `timestamp` and returns the start of
    /// that segment. Playback has to resync to the returned value.
    pub fn stream_seek(
        &self,
        stream: usize,
        forward: bool,
        timestamp: Duration,
    ) -> DashResult<Duration> {
        let mut state = self.state();
        let (index, start) = self.with_stream_in(&state, stream, |_, timeline| {
            let index = timeline.seek(timestamp, forward)?;
            let start = timeline.timestamp(index).ok_or(DashError::SegmentOutOfRange)?;
            Ok((index, start))
        })?;
        state.set_cursor(stream, SegmentCursor::At(index));
        Ok(start)
    }

    /// Wall clock time at which the current segment of a live stream becomes available.
    pub fn get_next_segment_availability_start_time(
        &self,
        stream: usize,
    ) -> DashResult<Option<DateTime<Utc>>> {
        let state = self.state();
        self.with_stream_in(&state, stream, |active, timeline| {
            Ok(timeline.availability_start_time(Self::current_index(active, stream)?))
        })
    }

    /// Positions every stream of a live presentation at the wall clock time `time`,
    /// switching period when needed.
    pub fn seek_to_time(&self, time: DateTime<Utc>) -> DashResult<()> {
        let mut state = self.state();
        let presentation = state.presentation()?;
        if presentation.is_static() {
            return Err(DashError::NotDynamic);
        }
        let availability_start_time = presentation
            .availability_start_time
            .ok_or_else(|| DashError::MpdParsing("Missing availabilityStartTime".to_string()))?;
        let timestamp = (time - availability_start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);

        let period_index = presentation.period_index_at(timestamp);
        let period = &presentation.periods[period_index];
        let switching = period_index != state.period_index;
        let mut streams = if switching {
            let mut rebuilt = Vec::with_capacity(state.active_streams.len());
            for active in &state.active_streams {
                let Some(set) = period.adaptation_sets.get(active.adaptation_set) else {
                    continue;
                };
                let representation =
                    select_representation(&set.representations, &self.options.ceilings)?;
                rebuilt.extend(ActiveStream::new(
                    period,
                    active.adaptation_set,
                    representation,
                    state.generation,
                ));
            }
            rebuilt
        } else {
            state.active_streams.clone()
        };

        // nothing is committed until every stream found its segment
        for active in &mut streams {
            let representation = active
                .representation(period)
                .ok_or(DashError::RepresentationIndexOutOfRange(active.representation))?;
            let timeline = RepresentationTimeline::new(&presentation, period, representation);
            active.cursor = SegmentCursor::At(timeline.seek(timestamp, true)?);
        }

        if switching {
            state.switch_period(period_index);
        }
        state.active_streams = streams;
        tracing::debug!(%time, ?timestamp, period_index, "Seeked to wall clock time");
        Ok(())
    }

    pub fn get_stream_presentation_offset(&self, stream: usize) -> DashResult<Duration> {
        let state = self.state();
        self.with_stream_in(&state, stream, |_, timeline| {
            Ok(timeline.presentation_time_offset())
        })
    }

    /// Resolved BaseURL of the stream's representation.
    pub fn base_url(&self, stream: usize) -> DashResult<Url> {
        let state = self.state();
        let presentation = state.presentation()?;
        let period = &presentation.periods[state.period_index];
        state
            .stream(stream)?
            .representation(period)
            .map(|representation| representation.base_url.clone())
            .ok_or(DashError::StaleStream(stream))
    }

    // Presentation wide queries

    pub fn media_presentation_duration(&self) -> DashResult<Option<Duration>> {
        Ok(self.state().presentation()?.media_presentation_duration)
    }

    /// `MPD@maxSegmentDuration`, or the longest segment of the current period.
    pub fn maximum_segment_duration(&self) -> DashResult<Option<Duration>> {
        let state = self.state();
        let presentation = state.presentation()?;
        if let Some(duration) = presentation.max_segment_duration {
            return Ok(Some(duration));
        }
        let period: &Period = &presentation.periods[state.period_index];
        Ok(period
            .adaptation_sets
            .iter()
            .flat_map(|set| set.representations.iter())
            .filter_map(|representation| {
                RepresentationTimeline::new(&presentation, period, representation)
                    .max_segment_duration()
            })
            .max())
    }

    pub fn is_live(&self) -> DashResult<bool> {
        Ok(self.state().presentation()?.is_dynamic())
    }

    pub fn availability_start_time(&self) -> DashResult<Option<DateTime<Utc>>> {
        Ok(self.state().presentation()?.availability_start_time)
    }

    /// `MPD@suggestedPresentationDelay`, or the configured default.
    pub fn presentation_delay(&self) -> DashResult<Duration> {
        let presentation = self.state().presentation()?;
        Ok(match presentation.suggested_presentation_delay {
            Some(delay) => delay,
            None => self
                .options
                .default_presentation_delay(presentation.max_segment_duration),
        })
    }

    pub fn utc_timing_sources(&self) -> DashResult<Option<(UtcTimingMethod, Vec<String>)>> {
        let presentation = self.state().presentation()?;
        Ok(get_utc_timing_sources(
            &presentation.utc_timings,
            self.options.utc_timing_methods,
        ))
    }

    pub fn update_failed_count(&self) -> u32 {
        self.state().update_failed_count
    }

    pub fn mpd_uri(&self) -> Option<Url> {
        self.state().mpd_uri.clone()
    }

    pub fn mpd_base_uri(&self) -> Option<Url> {
        self.state().mpd_base_uri.clone()
    }
}

/// Parses the body of an external period reference: zero or more `Period` elements.
fn parse_remote_periods(data: &[u8]) -> DashResult<Vec<dash_mpd::Period>> {
    let text = std::str::from_utf8(data)?.trim();
    // drop the XML declaration, the fragment gets wrapped into a document of its own
    let body = match text.strip_prefix("<?xml") {
        Some(rest) => rest.split_once("?>").map(|(_, body)| body).unwrap_or_default(),
        None => text,
    };
    let wrapped = format!(r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011">{body}</MPD>"#);
    Ok(dash_mpd::parse(&wrapped)?.periods)
}
