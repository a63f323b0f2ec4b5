use crate::manifest::{AdaptationSet, Framerate, MediaKind, Period, Representation};

/// Position of a stream within its representation's timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SegmentCursor {
    /// No segment resolved yet.
    #[default]
    Unpositioned,
    At(u64),
    /// Advanced forward past the last segment.
    PastEnd,
    /// Advanced backward past the first segment.
    BeforeStart,
}

impl SegmentCursor {
    pub fn index(&self) -> Option<u64> {
        match self {
            Self::At(index) => Some(*index),
            _ => None,
        }
    }

    pub fn is_positioned(&self) -> bool {
        !matches!(self, Self::Unpositioned)
    }
}

/// An adaptation set selected for playback, bound to one of its representations.
///
/// Streams refer to the presentation tree by index. A stream is valid only for the
/// presentation generation it was created in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveStream {
    pub adaptation_set: usize,
    pub representation: usize,
    pub generation: u64,
    pub kind: MediaKind,
    pub lang: Option<String>,
    pub cursor: SegmentCursor,
}

impl ActiveStream {
    /// Returns `None` when either index is out of range.
    pub fn new(
        period: &Period,
        adaptation_set: usize,
        representation: usize,
        generation: u64,
    ) -> Option<Self> {
        let set = period.adaptation_sets.get(adaptation_set)?;
        set.representations.get(representation)?;
        Some(Self {
            adaptation_set,
            representation,
            generation,
            kind: set.kind,
            lang: set.lang.clone(),
            cursor: SegmentCursor::Unpositioned,
        })
    }

    pub fn adaptation_set<'a>(&self, period: &'a Period) -> Option<&'a AdaptationSet> {
        period.adaptation_sets.get(self.adaptation_set)
    }

    pub fn representation<'a>(&self, period: &'a Period) -> Option<&'a Representation> {
        self.adaptation_set(period)?
            .representations
            .get(self.representation)
    }
}

/// Media parameters of a stream's current representation, as a decoder would want them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaParameters {
    pub kind: MediaKind,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u64>,
    pub height: Option<u64>,
    pub framerate: Option<Framerate>,
    pub audio_sampling_rate: Option<u32>,
    pub audio_channels: Option<u32>,
    pub bandwidth: u64,
    pub lang: Option<String>,
}

impl MediaParameters {
    pub fn new(adaptation_set: &AdaptationSet, representation: &Representation) -> Self {
        Self {
            kind: adaptation_set.kind,
            mime_type: representation
                .mime_type
                .clone()
                .or_else(|| adaptation_set.mime_type.clone()),
            codecs: representation.codecs.clone(),
            width: representation.width,
            height: representation.height,
            framerate: representation.framerate,
            audio_sampling_rate: representation.audio_sampling_rate,
            audio_channels: representation.audio_channels,
            bandwidth: representation.bandwidth,
            lang: adaptation_set.lang.clone(),
        }
    }
}
