//! Repository events that can start a pipeline run.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Kind of repository event.
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

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" | "pr" => Ok(EventKind::PullRequest),
            other => Err(Error::InvalidInput(format!("unknown event kind: {}", other))),
        }
    }
}

/// A git ref as carried by an event, classified by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefName<'a> {
    /// `refs/heads/<name>`
    Branch(&'a str),
    /// `refs/tags/<name>`
    Tag(&'a str),
    /// `refs/pull/<n>/merge` and friends.
    PullRequest(&'a str),
    /// Unqualified name; may be either a branch or a tag.
    Bare(&'a str),
}

impl<'a> RefName<'a> {
    pub fn parse(git_ref: &'a str) -> Self {
        if let Some(name) = git_ref.strip_prefix("refs/heads/") {
            RefName::Branch(name)
        } else if let Some(name) = git_ref.strip_prefix("refs/tags/") {
            RefName::Tag(name)
        } else if let Some(name) = git_ref.strip_prefix("refs/pull/") {
            RefName::PullRequest(name)
        } else {
            RefName::Bare(git_ref)
        }
    }

    /// The ref with its `refs/...` prefix removed.
    pub fn short_name(&self) -> &'a str {
        match self {
            RefName::Branch(n) | RefName::Tag(n) | RefName::PullRequest(n) | RefName::Bare(n) => n,
        }
    }

    pub fn could_be_branch(&self) -> bool {
        matches!(self, RefName::Branch(_) | RefName::Bare(_))
    }

    pub fn could_be_tag(&self) -> bool {
        matches!(self, RefName::Tag(_) | RefName::Bare(_))
    }
}

/// A repository event that may trigger a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    /// The ref the event applies to (`main`, `refs/tags/v1.2.3`, ...).
    pub git_ref: String,
    /// Repository-relative paths touched by the change. Empty means unknown
    /// or no changes, which never suppresses a run.
    pub paths_changed: Vec<String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: git_ref.into(),
            paths_changed: Vec::new(),
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, git_ref)
    }

    pub fn pull_request(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest, git_ref)
    }

    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths_changed = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn ref_name(&self) -> RefName<'_> {
        RefName::parse(&self.git_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref_classification() {
        assert_eq!(RefName::parse("refs/heads/main"), RefName::Branch("main"));
        assert_eq!(RefName::parse("refs/tags/v1.2.3"), RefName::Tag("v1.2.3"));
        assert_eq!(
            RefName::parse("refs/pull/42/merge"),
            RefName::PullRequest("42/merge")
        );
        assert_eq!(RefName::parse("feature/x"), RefName::Bare("feature/x"));
    }

    #[test]
    fn test_bare_ref_is_branch_or_tag() {
        let r = RefName::parse("v1.2.3");
        assert!(r.could_be_branch());
        assert!(r.could_be_tag());
        assert!(!RefName::parse("refs/tags/v1").could_be_branch());
        assert!(!RefName::parse("refs/pull/1/merge").could_be_tag());
    }

    #[test]
    fn test_event_kind_parsing() {
        assert_eq!("push".parse::<EventKind>().unwrap(), EventKind::Push);
        assert_eq!(
            "pull_request".parse::<EventKind>().unwrap(),
            EventKind::PullRequest
        );
        assert!("tag".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_event_builder() {
        let event = TriggerEvent::pull_request("refs/pull/3/merge").with_paths(["docs/readme.md"]);
        assert_eq!(event.kind, EventKind::PullRequest);
        assert_eq!(event.paths_changed, vec!["docs/readme.md".to_string()]);
    }
}
