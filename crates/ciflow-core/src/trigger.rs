//! Trigger events and the workflow `on:` block.

use std::fmt;
use std::str::FromStr;

use glob_match::glob_match;
use serde::{Deserialize, Serialize};

use crate::error::CiError;

// ---------------------------------------------------------------------------
// EventKind / Trigger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" => Ok(EventKind::PullRequest),
            other => Err(CiError::UnknownEvent(other.to_string())),
        }
    }
}

/// The activity that starts a run.
///
/// For `push` the branch is the pushed branch; for `pull_request` it is the
/// branch the pull request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub event: EventKind,
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

impl Trigger {
    pub fn new(event: EventKind, branch: impl Into<String>) -> Self {
        Self {
            event,
            branch: branch.into(),
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Commit to check out; `HEAD` when the trigger does not pin one.
    pub fn revision(&self) -> &str {
        self.sha.as_deref().unwrap_or("HEAD")
    }
}

// ---------------------------------------------------------------------------
// EventFilter / TriggerSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(
        default,
        rename = "branches-ignore",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub branches_ignore: Vec<String>,
}

impl EventFilter {
    /// Branch filter semantics: with `branches`, the last matching pattern
    /// decides (a `!` prefix negates); with `branches-ignore`, any match
    /// rejects. No filter accepts every branch.
    ///
    /// Patterns are globs: `*` stays within one `/` segment, `**` crosses
    /// segments.
    pub fn accepts(&self, branch: &str) -> bool {
        if !self.branches.is_empty() {
            let mut accepted = false;
            for pattern in &self.branches {
                if let Some(negated) = pattern.strip_prefix('!') {
                    if glob_match(negated, branch) {
                        accepted = false;
                    }
                } else if glob_match(pattern, branch) {
                    accepted = true;
                }
            }
            return accepted;
        }
        !self
            .branches_ignore
            .iter()
            .any(|pattern| glob_match(pattern, branch))
    }
}

/// The parsed `on:` block: event name → optional branch filter, in
/// declaration order. Accepts the string, list, and map forms.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "RawOn")]
pub struct TriggerSpec {
    pub events: Vec<(String, EventFilter)>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOn {
    One(String),
    Many(Vec<String>),
    Map(serde_yaml::Mapping),
}

impl TryFrom<RawOn> for TriggerSpec {
    type Error = String;

    fn try_from(raw: RawOn) -> Result<Self, Self::Error> {
        let events = match raw {
            RawOn::One(event) => vec![(event, EventFilter::default())],
            RawOn::Many(events) => events
                .into_iter()
                .map(|e| (e, EventFilter::default()))
                .collect(),
            RawOn::Map(map) => {
                let mut events = Vec::with_capacity(map.len());
                for (key, value) in map {
                    let name = key
                        .as_str()
                        .ok_or_else(|| "event names in `on` must be strings".to_string())?
                        .to_string();
                    let filter = if value.is_null() {
                        EventFilter::default()
                    } else {
                        serde_yaml::from_value(value)
                            .map_err(|e| format!("invalid filter for event '{name}': {e}"))?
                    };
                    events.push((name, filter));
                }
                events
            }
        };
        Ok(TriggerSpec { events })
    }
}

impl TriggerSpec {
    pub fn matches(&self, trigger: &Trigger) -> bool {
        self.events
            .iter()
            .any(|(name, filter)| name == trigger.event.as_str() && filter.accepts(&trigger.branch))
    }

    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.events.iter().map(|(name, _)| name.as_str())
    }
}
