use std::io::{self, BufRead, Write};

use async_trait::async_trait;
use tracing::warn;

use crate::types::{Decision, Track};

/// Decides whether a candidate genre should be written to a track.
#[async_trait]
pub trait DecisionProvider: Send {
    async fn ask(&mut self, track: &Track, candidate_genre: &str) -> Decision;
}

/// Interactive y/n/a/q prompt on the terminal.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

#[async_trait]
impl DecisionProvider for TerminalPrompt {
    async fn ask(&mut self, track: &Track, candidate_genre: &str) -> Decision {
        print!("{}", render_prompt(track, candidate_genre));
        let _ = io::stdout().flush();

        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) => None,
                Ok(_) => Some(line),
                Err(e) => {
                    warn!("failed to read answer: {e}");
                    None
                }
            }
        })
        .await;

        match line {
            Ok(Some(line)) => Decision::parse(&line),
            Ok(None) => Decision::No,
            Err(e) => {
                warn!("prompt task failed: {e}");
                Decision::No
            }
        }
    }
}

/// Accepts every candidate without asking.
#[derive(Debug, Default)]
pub struct AutoAccept;

#[async_trait]
impl DecisionProvider for AutoAccept {
    async fn ask(&mut self, _track: &Track, _candidate_genre: &str) -> Decision {
        Decision::Yes
    }
}

fn render_prompt(track: &Track, candidate_genre: &str) -> String {
    format!(
        "\n  Artist:         {}\n  Title:          {}\n  Current genre:  {}\n  Beatport genre: {}\n  Update genre? [y/n/a/q] ",
        track.artist,
        track.title,
        track.genre_or_none(),
        candidate_genre
    )
}
