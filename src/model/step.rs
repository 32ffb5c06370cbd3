//! Step tree node types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::time::{DurationUnit, Meridiem};

/// Default timeout of a notify-until step
pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 10_000;

/// Opaque step identifier, unique within one timer's tree
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Where the audio of a sound step comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoundSource {
    #[default]
    Default,
    Url,
    Uploaded,
}

/// Sound selection shared by the sound and notify-until steps
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundSpec {
    #[serde(default)]
    pub sound_source: SoundSource,
    #[serde(default)]
    pub label: String,
    /// Remote URL or data URL of an uploaded file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl SoundSpec {
    /// The URL to play, falling back to `default_url` for the built-in sound
    /// or when no custom URL was provided.
    pub fn effective_url<'a>(&'a self, default_url: &'a str) -> &'a str {
        match (self.sound_source, self.url.as_deref()) {
            (SoundSource::Url | SoundSource::Uploaded, Some(url)) if !url.trim().is_empty() => url,
            _ => default_url,
        }
    }
}

/// Number of passes of a loop step. Serialized as an integer, `-1` meaning
/// infinite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum RepeatCount {
    Infinite,
    Times(u32),
}

impl From<i64> for RepeatCount {
    fn from(value: i64) -> Self {
        match value {
            -1 => RepeatCount::Infinite,
            n if n <= 0 => RepeatCount::Times(0),
            n => RepeatCount::Times(u32::try_from(n).unwrap_or(u32::MAX)),
        }
    }
}

impl From<RepeatCount> for i64 {
    fn from(value: RepeatCount) -> Self {
        match value {
            RepeatCount::Infinite => -1,
            RepeatCount::Times(n) => i64::from(n),
        }
    }
}

/// A node of the step tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// The kind of a step together with its settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum StepKind {
    Wait {
        amount: f64,
        unit: DurationUnit,
    },
    WaitUntil {
        time: String,
        meridiem: Meridiem,
    },
    PlaySound(SoundSpec),
    PlaySoundUntil(SoundSpec),
    Notify {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
    },
    NotifyUntil {
        title: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        body: Option<String>,
        #[serde(flatten)]
        sound: SoundSpec,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        #[serde(default)]
        interval_seconds: f64,
        #[serde(default)]
        children: Vec<Step>,
    },
    Loop {
        repeat_count: RepeatCount,
        #[serde(default)]
        children: Vec<Step>,
    },
    /// A step type this build does not know; skipped when run
    #[serde(other)]
    Unknown,
}

impl StepKind {
    /// Short name of the kind, as used in the serialized `type` tag
    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Wait { .. } => "wait",
            StepKind::WaitUntil { .. } => "waitUntil",
            StepKind::PlaySound(_) => "playSound",
            StepKind::PlaySoundUntil(_) => "playSoundUntil",
            StepKind::Notify { .. } => "notify",
            StepKind::NotifyUntil { .. } => "notifyUntil",
            StepKind::Loop { .. } => "loop",
            StepKind::Unknown => "unknown",
        }
    }
}

impl Step {
    pub fn new(kind: StepKind) -> Self {
        Self { id: StepId::generate(), kind }
    }

    pub fn with_id(id: impl Into<StepId>, kind: StepKind) -> Self {
        Self { id: id.into(), kind }
    }

    /// Loop and notify-until steps can hold children
    pub fn is_container(&self) -> bool {
        matches!(self.kind, StepKind::Loop { .. } | StepKind::NotifyUntil { .. })
    }

    pub fn children(&self) -> &[Step] {
        match &self.kind {
            StepKind::Loop { children, .. } | StepKind::NotifyUntil { children, .. } => children,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Step>> {
        match &mut self.kind {
            StepKind::Loop { children, .. } | StepKind::NotifyUntil { children, .. } => Some(children),
            _ => None,
        }
    }

    /// Remove and return the children, leaving the container empty
    pub fn take_children(&mut self) -> Vec<Step> {
        self.children_mut().map(std::mem::take).unwrap_or_default()
    }

    /// Visit this step and every descendant, depth first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Step)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

impl From<String> for StepId {
    fn from(value: String) -> Self {
        Self(value)
    }
}
