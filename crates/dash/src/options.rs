use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{clock::UtcTimingMethods, selector::RepresentationCeilings, time};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Consecutive failed refreshes after which refreshing gives up.
    pub max_update_failures: u32,
    /// Presentation delay of dynamic manifests without `@suggestedPresentationDelay`.
    /// A number followed by `s`, `ms` or `f` (multiples of the maximum segment duration).
    pub default_presentation_delay: String,
    pub utc_timing_methods: UtcTimingMethods,
    /// Applied when a stream is set up without an explicit representation.
    pub ceilings: RepresentationCeilings,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            max_update_failures: 3,
            default_presentation_delay: "10s".to_string(),
            utc_timing_methods: UtcTimingMethods::default(),
            ceilings: RepresentationCeilings::default(),
        }
    }
}

impl ClientOptions {
    pub fn default_presentation_delay(&self, max_segment_duration: Option<Duration>) -> Duration {
        time::parse_default_presentation_delay(
            &self.default_presentation_delay,
            max_segment_duration,
        )
        .unwrap_or_else(|| {
            tracing::warn!(
                value = %self.default_presentation_delay,
                "Invalid default presentation delay, using none"
            );
            Duration::ZERO
        })
    }
}
