use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashError {
    // Manifest errors
    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error("Invalid MPD: {0}")]
    MpdParsing(String),

    #[error("MPD contains no period")]
    NoPeriodFound,

    #[error("Adaptation set {0} has no representation")]
    EmptyAdaptationSet(usize),

    #[error("Invalid media range: {0}")]
    InvalidMediaRange(String),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),

    // Selection errors
    #[error("No manifest has been loaded")]
    NoManifest,

    #[error("No representation found")]
    NoRepresentationFound,

    #[error("Period index {0} out of range")]
    PeriodIndexOutOfRange(usize),

    #[error("Period with id {0:?} not found")]
    PeriodIdNotFound(String),

    #[error("Adaptation set index {0} out of range")]
    AdaptationSetIndexOutOfRange(usize),

    #[error("Representation index {0} out of range")]
    RepresentationIndexOutOfRange(usize),

    #[error("Active stream index {0} out of range")]
    StreamIndexOutOfRange(usize),

    #[error("Active stream {0} refers to a replaced manifest")]
    StaleStream(usize),

    #[error("Presentation is not dynamic")]
    NotDynamic,

    // Navigation errors
    #[error("Active stream {0} has no current segment")]
    StreamNotPositioned(usize),

    #[error("No segment at the requested position")]
    SegmentOutOfRange,

    #[error("Segment is not available before {0}")]
    SegmentNotAvailable(DateTime<Utc>),

    // Refresh and network errors
    #[error("Manifest refresh failed {attempts} times (max {max})")]
    RefreshFailed { attempts: u32, max: u32 },

    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error("Invalid timing schema: {0:?}")]
    InvalidTimingSchema(String),

    #[error(transparent)]
    ChronoParseError(#[from] chrono::ParseError),
}

impl DashError {
    /// Whether the error came out of manifest parsing or validation.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::MpdParseError(_)
                | Self::MpdParsing(_)
                | Self::NoPeriodFound
                | Self::EmptyAdaptationSet(_)
                | Self::InvalidMediaRange(_)
                | Self::UrlParseError(_)
                | Self::Utf8Error(_)
        )
    }
}

pub type DashResult<T> = Result<T, DashError>;
