use anyhow::Context;
use clap::Subcommand;
use pan_tracker::core_modules::history::{self, StoredSession};
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// List every saved session summary.
    List,
    /// Show one session's counts and its full timeline.
    Show {
        /// 1-based position in the listing.
        index: usize,
    },
    /// Show per-kind frequencies and direction splits for one session.
    Analyze { index: usize },
}

pub fn execute(dir: &Path, action: HistoryAction) -> anyhow::Result<()> {
    let sessions = history::list_sessions(dir).with_context(|| format!("reading {}", dir.display()))?;
    if sessions.is_empty() {
        println!("No activity sessions in {}", dir.display());
        return Ok(());
    }

    match action {
        HistoryAction::List => {
            for (i, session) in sessions.iter().enumerate() {
                let s = &session.summary;
                println!(
                    "{:>3}. {:<16} {}  {:>8.1}s  {:>5} events",
                    i + 1,
                    s.person_name,
                    s.session_start.format("%Y-%m-%d %H:%M:%S"),
                    s.session_duration_seconds,
                    s.total_activities
                );
            }
        }
        HistoryAction::Show { index } => {
            let session = pick(&sessions, index)?;
            print_header(session);
            for (kind, count) in &session.summary.activity_counts {
                println!("  {kind:<12} {count}");
            }
            println!();
            let timeline = history::read_timeline(&session.summary)?;
            for entry in &timeline {
                let position = match (entry.face_center_x, entry.face_center_y) {
                    (Some(x), Some(y)) => format!("({x:.0}, {y:.0})"),
                    _ => "-".to_string(),
                };
                println!(
                    "  frame {:>6}  {:<11} {:<14} {}",
                    entry.frame_number,
                    entry.activity_type.as_str(),
                    position,
                    entry.details
                );
            }
        }
        HistoryAction::Analyze { index } => {
            let session = pick(&sessions, index)?;
            print_header(session);
            let timeline = history::read_timeline(&session.summary)?;
            let report = history::analyze(&timeline);
            for (kind, pattern) in &report.by_kind {
                let kind = kind.as_str();
                match pattern.mean_interval_frames {
                    Some(gap) => println!("  {kind:<12} {:>4} times, every {gap:.1} frames on average", pattern.count),
                    None => println!("  {kind:<12} {:>4} times", pattern.count),
                }
            }
            let (left, right) = report.horizontal_moves;
            let (up, down) = report.vertical_moves;
            println!("  horizontal: {left} left / {right} right");
            println!("  vertical:   {up} up / {down} down");
        }
    }
    Ok(())
}

fn pick(sessions: &[StoredSession], index: usize) -> anyhow::Result<&StoredSession> {
    index
        .checked_sub(1)
        .and_then(|i| sessions.get(i))
        .with_context(|| format!("no session #{index}, there are {}", sessions.len()))
}

fn print_header(session: &StoredSession) {
    let s = &session.summary;
    println!("{} ({})", s.person_name, session.path.display());
    println!(
        "  {} -> {}, {:.2}s, {} events",
        s.session_start.format("%H:%M:%S"),
        s.session_end.format("%H:%M:%S"),
        s.session_duration_seconds,
        s.total_activities
    );
}
