//! Save status of an editing session

use serde::Serialize;

/// Where the session stands relative to the last persisted content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    /// Local content matches the last persisted content
    #[default]
    Idle,

    /// Local content changed; a save is scheduled or waiting for a trigger
    Dirty,

    /// A persistence call is in flight
    Saving,

    /// Shown briefly after a successful save
    Saved,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Dirty => "dirty",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
        }
    }

    /// The three-state value shown to users: a dirty session reads as idle
    /// until its save starts
    pub fn displayed(&self) -> &'static str {
        match self {
            SaveStatus::Idle | SaveStatus::Dirty => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
        }
    }

    /// Short status line for the terminal
    pub fn indicator(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "All changes saved",
            SaveStatus::Dirty => "Unsaved changes",
            SaveStatus::Saving => "Saving...",
            SaveStatus::Saved => "Saved",
        }
    }
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One status change, in the order it happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: SaveStatus,
    pub to: SaveStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_displays_as_idle() {
        assert_eq!(SaveStatus::Dirty.displayed(), "idle");
        assert_eq!(SaveStatus::Saving.displayed(), "saving");
        assert_eq!(SaveStatus::Saved.displayed(), "saved");
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&SaveStatus::Saving).unwrap();
        assert_eq!(json, "\"saving\"");
    }
}
