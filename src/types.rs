use std::fmt;

use serde::{Deserialize, Serialize};

/// One row of the Mixxx `library` table, reduced to what genre sync needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub artist: String,
    pub title: String,
    pub genre: Option<String>,
}

impl Track {
    /// `"Artist - Title"`, used in progress lines and prompts.
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    pub fn genre_or_none(&self) -> &str {
        self.genre.as_deref().unwrap_or("None")
    }
}

/// Crate and genre restrictions for a sync run. Empty means "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackFilter {
    pub crates: Vec<String>,
    pub genres: Vec<String>,
}

impl TrackFilter {
    pub fn new(crates: Vec<String>, genres: Vec<String>) -> Self {
        Self { crates, genres }
    }
}

/// The genre picked from a catalog search, plus how many results came back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMatch {
    pub genre: String,
    pub result_count: usize,
}

impl CandidateMatch {
    pub fn is_ambiguous(&self) -> bool {
        self.result_count > 1
    }
}

/// One answer from a [`crate::prompt::DecisionProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    All,
    Quit,
}

impl Decision {
    /// Parse a prompt answer. Anything unrecognized is `No`.
    pub fn parse(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Self::Yes,
            "a" | "all" => Self::All,
            "q" | "quit" => Self::Quit,
            _ => Self::No,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::All => "all",
            Self::Quit => "quit",
        };
        f.write_str(s)
    }
}
