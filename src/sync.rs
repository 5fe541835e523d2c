use std::fmt;

use tracing::{debug, info, warn};

use crate::beatport::CatalogSearch;
use crate::db::{DbError, LibraryDb};
use crate::prompt::DecisionProvider;
use crate::track_name;
use crate::types::{Decision, TrackFilter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    Quit,
    AuthFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Quit => f.write_str("stopped by user"),
            Self::AuthFailed(reason) => write!(f, "aborted, authentication failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub total: usize,
    pub processed: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub no_match: usize,
    pub skipped: usize,
    pub stop: StopReason,
}

/// Mutable state of one run. Never persisted.
struct SyncState {
    auto_accept: bool,
    processed: usize,
    updated: usize,
    unchanged: usize,
    no_match: usize,
    skipped: usize,
    aborted: Option<StopReason>,
}

impl SyncState {
    fn new(auto_accept: bool) -> Self {
        Self {
            auto_accept,
            processed: 0,
            updated: 0,
            unchanged: 0,
            no_match: 0,
            skipped: 0,
            aborted: None,
        }
    }

    fn into_report(self, total: usize) -> SyncReport {
        SyncReport {
            total,
            processed: self.processed,
            updated: self.updated,
            unchanged: self.unchanged,
            no_match: self.no_match,
            skipped: self.skipped,
            stop: self.aborted.unwrap_or(StopReason::Completed),
        }
    }
}

/// Walk the selected tracks and write Beatport genres back to the library.
///
/// Owns `db` and closes it before returning, whatever the outcome.
pub async fn run<C, D>(
    mut db: LibraryDb,
    filter: &TrackFilter,
    catalog: &mut C,
    decisions: &mut D,
    auto_accept: bool,
) -> Result<SyncReport, DbError>
where
    C: CatalogSearch + ?Sized,
    D: DecisionProvider + ?Sized,
{
    let result = sync_tracks(&db, filter, catalog, decisions, auto_accept).await;
    db.close();
    eprintln!("{}", summary(&result));
    result
}

async fn sync_tracks<C, D>(
    db: &LibraryDb,
    filter: &TrackFilter,
    catalog: &mut C,
    decisions: &mut D,
    auto_accept: bool,
) -> Result<SyncReport, DbError>
where
    C: CatalogSearch + ?Sized,
    D: DecisionProvider + ?Sized,
{
    let tracks = db.tracks(filter)?;
    let total = tracks.len();
    let mut state = SyncState::new(auto_accept);

    if tracks.is_empty() {
        eprintln!("No tracks match the given filters.");
        return Ok(state.into_report(total));
    }
    eprintln!("Processing {total} tracks\n");

    for (i, track) in tracks.iter().enumerate() {
        let idx = i + 1;
        let label = track.label();
        state.processed += 1;

        let parsed = track_name::parse(&track.title);
        debug!("track {} parsed as {:?}", track.id, parsed);

        let result = match catalog
            .search_track(&track.artist, &parsed.name, parsed.mix.as_deref())
            .await
        {
            Ok(result) => result,
            Err(e) if e.is_fatal() => {
                eprintln!("[{idx}/{total}] ABORT {label}: {e}");
                state.aborted = Some(StopReason::AuthFailed(e.to_string()));
                break;
            }
            Err(e) => {
                eprintln!("[{idx}/{total}] SKIP {label}: {e}");
                state.skipped += 1;
                continue;
            }
        };

        let Some(candidate) = result.candidate() else {
            eprintln!("[{idx}/{total}] NO MATCH {label}");
            state.no_match += 1;
            continue;
        };

        if track.genre.as_deref() == Some(candidate.genre.as_str()) {
            eprintln!("[{idx}/{total}] SAME {label}: {}", candidate.genre);
            state.unchanged += 1;
            continue;
        }

        if candidate.is_ambiguous() {
            warn!(
                "{} results for track {}, using the first",
                candidate.result_count, track.id
            );
            eprintln!(
                "[{idx}/{total}] {label}: {} results, using the first",
                candidate.result_count
            );
        }

        let decision = if state.auto_accept {
            Decision::Yes
        } else {
            decisions.ask(track, &candidate.genre).await
        };
        match decision {
            Decision::Yes => {}
            Decision::All => {
                info!("auto-accept enabled for the rest of the run");
                state.auto_accept = true;
            }
            Decision::No => {
                eprintln!("[{idx}/{total}] SKIP {label}: declined");
                state.skipped += 1;
                continue;
            }
            Decision::Quit => {
                state.aborted = Some(StopReason::Quit);
                break;
            }
        }

        match db.update_track_genre(track, &candidate.genre) {
            Ok(()) => {
                eprintln!(
                    "[{idx}/{total}] {label}: {} -> {}",
                    track.genre_or_none(),
                    candidate.genre
                );
                state.updated += 1;
            }
            Err(e) => {
                eprintln!("[{idx}/{total}] FAIL {label}: {e}");
                state.skipped += 1;
            }
        }
    }

    Ok(state.into_report(total))
}

fn summary(result: &Result<SyncReport, DbError>) -> String {
    match result {
        Ok(report) => format!(
            "\nDone ({}): {} of {} processed, {} updated, {} unchanged, {} no match, {} skipped",
            report.stop,
            report.processed,
            report.total,
            report.updated,
            report.unchanged,
            report.no_match,
            report.skipped
        ),
        Err(e) => format!("\nDone (failed: {e}): 0 processed, 0 updated"),
    }
}
