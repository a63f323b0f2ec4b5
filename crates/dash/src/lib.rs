//! MPEG-DASH manifest client.
//!
//! ```text
//!   MPD bytes ──► Presentation ──► Period ──► AdaptationSet ──► Representation
//!                      ▲                            │                 │
//!                      │ refresh (Arc swap)         ▼                 ▼
//!                 MpdClient ◄────────────── ActiveStream ──► RepresentationTimeline
//!                                            (cursor)               │
//!                                                                   ▼
//!                                                    MediaFragment / HeaderFragment
//! ```
//!
//! [`MpdClient`] owns the current [`manifest::Presentation`] and the streams selected for
//! playback. Streams walk their representation's segments forward and backward, seek by
//! time, switch bitrate and cross periods. Network access goes through a [`Downloader`].

pub mod client;
pub mod clock;
pub mod downloader;
pub mod error;
pub mod manifest;
pub mod navigator;
pub mod options;
pub mod profile;
pub mod selector;
pub mod stream;
pub mod time;

mod range;

pub use client::{AdaptationSetSummary, MpdClient, StreamPeriod};
pub use clock::{Clock, UtcTimingMethod, UtcTimingMethods};
pub use downloader::{Downloader, Fetched, HttpDownloader};
pub use error::{DashError, DashResult};
pub use manifest::{MediaKind, Presentation, PresentationType};
pub use navigator::{HeaderFragment, MediaFragment, SegmentAdvance};
pub use options::ClientOptions;
pub use range::ByteRange;
pub use selector::RepresentationCeilings;
pub use stream::{ActiveStream, MediaParameters, SegmentCursor};
