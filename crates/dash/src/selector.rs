//! Representation selection within an adaptation set.

use serde::{Deserialize, Serialize};

use crate::{
    manifest::{Framerate, Representation},
    DashError, DashResult,
};

/// Upper bounds applied when choosing a representation. `None` is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepresentationCeilings {
    pub max_bandwidth: Option<u64>,
    pub max_width: Option<u64>,
    pub max_height: Option<u64>,
    pub max_framerate: Option<Framerate>,
}

impl RepresentationCeilings {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::default()
    }

    /// A representation missing a constrained attribute passes that ceiling.
    pub fn admits(&self, representation: &Representation) -> bool {
        fn within<T: PartialOrd>(value: Option<T>, ceiling: Option<T>) -> bool {
            match (value, ceiling) {
                (Some(value), Some(ceiling)) => value <= ceiling,
                _ => true,
            }
        }

        within(Some(representation.bandwidth), self.max_bandwidth)
            && within(representation.width, self.max_width)
            && within(representation.height, self.max_height)
            && within(representation.framerate, self.max_framerate)
    }
}

/// Negative values mean "no limit".
pub fn bandwidth_ceiling(value: i64) -> Option<u64> {
    u64::try_from(value).ok()
}

/// Highest bandwidth representation admitted by `ceilings`, first in document order on
/// ties. Falls back to the lowest bandwidth one when nothing fits.
pub fn max_bandwidth_index(
    representations: &[Representation],
    ceilings: &RepresentationCeilings,
) -> Option<usize> {
    let admitted = representations
        .iter()
        .enumerate()
        .filter(|(_, representation)| ceilings.admits(representation))
        // max_by_key keeps the last maximum, so compare with reversed indices
        .max_by(|(a_idx, a), (b_idx, b)| a.bandwidth.cmp(&b.bandwidth).then(b_idx.cmp(a_idx)))
        .map(|(index, _)| index);

    admitted.or_else(|| {
        let fallback = min_bandwidth_index(representations);
        if fallback.is_some() {
            tracing::debug!(?ceilings, "No representation within ceilings, using the lowest");
        }
        fallback
    })
}

/// Startup choice: the lowest bandwidth without ceilings, the best admitted one otherwise.
pub fn select_representation(
    representations: &[Representation],
    ceilings: &RepresentationCeilings,
) -> DashResult<usize> {
    let selected = if ceilings.is_unbounded() {
        min_bandwidth_index(representations)
    } else {
        max_bandwidth_index(representations, ceilings)
    };
    selected.ok_or(DashError::NoRepresentationFound)
}

/// Lowest bandwidth representation, first in document order on ties.
pub fn min_bandwidth_index(representations: &[Representation]) -> Option<usize> {
    representations
        .iter()
        .enumerate()
        .min_by_key(|(_, representation)| representation.bandwidth)
        .map(|(index, _)| index)
}
