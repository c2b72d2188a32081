//! Event builders for the nightly EMF checklist.
//!
//! Completing a checklist task can be broadcast as a kind-1 note tagged with the community
//! hashtags, and the same hashtags drive the default community subscription.

use std::fmt;

use crate::nip01::{Filter, KIND_TEXT_NOTE, UnsignedEvent};

/// Relay used when the host application does not configure one.
pub const DEFAULT_RELAY_URL: &str = "wss://relay.damus.io";

pub const HASHTAG_EMF_HEALTH: &str = "emf-health";
pub const HASHTAG_SLEEP_OPTIMIZATION: &str = "sleep-optimization";

const MAX_HEALTH_SCORE: u8 = 100;

/// One item on the bedtime checklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NightlyTask {
    WifiRouter,
    PhoneDistance,
    StovetopCooking,
    SmartTv,
}

impl NightlyTask {
    pub const ALL: [Self; 4] = [
        Self::WifiRouter,
        Self::PhoneDistance,
        Self::StovetopCooking,
        Self::SmartTv,
    ];

    /// Stable identifier shared with the host application's task list.
    pub fn slug(self) -> &'static str {
        match self {
            Self::WifiRouter => "wifi",
            Self::PhoneDistance => "phone",
            Self::StovetopCooking => "microwave",
            Self::SmartTv => "tv",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::WifiRouter => "WiFi Router Shutdown",
            Self::PhoneDistance => "Phone Distance",
            Self::StovetopCooking => "Stovetop Cooking",
            Self::SmartTv => "Smart TV Shutdown",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|task| task.slug() == slug)
    }
}

impl fmt::Display for NightlyTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Note announcing a completed task. `created_at` is left for the publisher to fill in.
pub fn task_completion_note(task: NightlyTask, health_score: u8) -> UnsignedEvent {
    let score = health_score.min(MAX_HEALTH_SCORE);
    UnsignedEvent::new(
        KIND_TEXT_NOTE,
        format!(
            "Just completed {task} task for better EMF sleep health! \u{1f319} Score: {score}/{MAX_HEALTH_SCORE} #{HASHTAG_EMF_HEALTH} #{HASHTAG_SLEEP_OPTIMIZATION}"
        ),
    )
    .with_hashtag(HASHTAG_EMF_HEALTH)
    .with_hashtag(HASHTAG_SLEEP_OPTIMIZATION)
}

/// Text notes carrying either community hashtag.
pub fn community_filter() -> Filter {
    Filter::new()
        .kinds([KIND_TEXT_NOTE])
        .hashtags([HASHTAG_EMF_HEALTH, HASHTAG_SLEEP_OPTIMIZATION])
}
