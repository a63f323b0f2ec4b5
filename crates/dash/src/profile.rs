//! `MPD@profiles` interpretation.
//!
//! Profiles only steer how segments are addressed. Anything unknown falls back to the
//! self-describing template path and never fails a load.

use crate::manifest::{Presentation, Representation, SegmentAddressing};

pub const ISOFF_ON_DEMAND: &str = "urn:mpeg:dash:profile:isoff-on-demand:2011";
pub const ISOFF_LIVE: &str = "urn:mpeg:dash:profile:isoff-live:2011";
pub const ISOFF_MAIN: &str = "urn:mpeg:dash:profile:isoff-main:2011";
pub const FULL: &str = "urn:mpeg:dash:profile:full:2011";
pub const CMAF: &str = "urn:mpeg:dash:profile:cmaf:2019";
pub const DVB_DASH: &str = "urn:dvb:dash:profile:dvb-dash:2014";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Profiles {
    pub isoff_on_demand: bool,
    pub isoff_live: bool,
    pub isoff_main: bool,
    pub full: bool,
    pub cmaf: bool,
    pub dvb_dash: bool,
}

impl Profiles {
    pub fn from_identifiers<'a, I>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut profiles = Self::default();
        for identifier in identifiers {
            match identifier.trim() {
                ISOFF_ON_DEMAND => profiles.isoff_on_demand = true,
                ISOFF_LIVE => profiles.isoff_live = true,
                ISOFF_MAIN => profiles.isoff_main = true,
                FULL => profiles.full = true,
                CMAF => profiles.cmaf = true,
                DVB_DASH => profiles.dvb_dash = true,
                other => tracing::debug!(profile = other, "Ignoring unknown profile"),
            }
        }
        profiles
    }

    /// Whether the index segment of `representation` has to be fetched, ahead of the
    /// initialization segment, before any media segment can be located.
    pub fn requires_index_segment(&self, representation: &Representation) -> bool {
        self.isoff_on_demand
            && matches!(
                &representation.addressing,
                SegmentAddressing::SegmentBase(base) if base.index_range.is_some()
            )
    }
}

pub fn check_profiles(presentation: &Presentation) -> Profiles {
    Profiles::from_identifiers(presentation.profiles.iter().map(String::as_str))
}
