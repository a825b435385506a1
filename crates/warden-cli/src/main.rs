mod export;
mod replay;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use warden_core::{
    Embedding, FaceClass, Gallery, InMemoryGallery, NewEvent, Outcome, SubjectProfile, Verdict,
};
use warden_engine::config::days as window_days;
use warden_engine::{Config, FrameSource, Session};
use warden_ledger::{AuditLedger, SqliteLedger};

#[derive(Parser)]
#[command(name = "warden", about = "Warden face-recognition audit trail CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show event counts and the most recent events
    Stats {
        /// Trailing window in days (default: WARDEN_LEDGER_RETENTION_DAYS)
        #[arg(long)]
        days: Option<u32>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Export events oldest-first
    Export {
        #[arg(long)]
        days: Option<u32>,
        #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
        format: ExportFormat,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the activity of one subject
    Subject {
        id: String,
        #[arg(long)]
        days: Option<u32>,
    },
    /// Replay a recorded JSON-lines trace through a full session
    Replay {
        trace: PathBuf,
        /// Gallery JSON file used to match faces that carry an embedding
        #[arg(long)]
        gallery: Option<PathBuf>,
    },
    /// Manage enrolled subjects in a gallery file
    User {
        /// Gallery JSON file
        #[arg(long)]
        gallery: PathBuf,
        #[command(subcommand)]
        action: UserAction,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Enroll a new subject
    Enroll {
        id: String,
        #[arg(long)]
        name: String,
        /// Comma-separated embedding values
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        embedding: Vec<f32>,
        #[arg(long)]
        photo: Option<PathBuf>,
    },
    /// Remove an enrolled subject
    Remove { id: String },
    /// Replace a subject's photo
    Photo { id: String, photo: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Csv,
    Jsonl,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let ledger = open_ledger(&config.db_path)?;
    let window = |d: Option<u32>| window_days(d.unwrap_or(config.ledger_retention_days));

    match cli.command {
        Commands::Stats { days, json } => {
            let summary = ledger.query_window(window(days))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }
            println!("Events in the last {} day(s):", days.unwrap_or(config.ledger_retention_days));
            if summary.counts.is_empty() {
                println!("  (none)");
            }
            for c in &summary.counts {
                let avg = c
                    .avg_match_score
                    .map(|s| format!("  avg score {s:.3}"))
                    .unwrap_or_default();
                println!("  {:<20} {:<8} {:>6}{avg}", c.kind, c.outcome, c.count);
            }
            if !summary.recent.is_empty() {
                println!("Most recent:");
            }
            for e in &summary.recent {
                println!(
                    "  {}  {:<20} {:<8} {:<12} {}",
                    e.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    e.kind,
                    e.outcome,
                    e.subject_id.as_deref().unwrap_or("-"),
                    e.match_score.map(|s| format!("{s:.3}")).unwrap_or_default(),
                );
            }
        }
        Commands::Export {
            days,
            format,
            output,
        } => {
            let events = ledger.export_range(window(days))?;
            let mut out: Box<dyn Write> = match &output {
                Some(path) => Box::new(BufWriter::new(
                    std::fs::File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?,
                )),
                None => Box::new(BufWriter::new(std::io::stdout().lock())),
            };
            let rows = match format {
                ExportFormat::Csv => export::write_csv(events, &mut out)?,
                ExportFormat::Jsonl => export::write_jsonl(events, &mut out)?,
            };
            out.flush()?;
            tracing::info!(rows, "export complete");
        }
        Commands::Subject { id, days } => {
            let s = ledger.subject_summary(&id, window(days))?;
            println!("Subject:           {}", s.subject_id);
            println!("Recognitions:      {}", s.recognitions);
            match s.last_recognized {
                Some(ts) => println!("Last recognized:   {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
                None => println!("Last recognized:   never"),
            }
            if let Some(avg) = s.avg_match_score {
                println!("Average score:     {avg:.3}");
            }
            println!("Management events: {}", s.management_events);
        }
        Commands::Replay { trace, gallery } => {
            let gallery = match gallery {
                Some(path) => InMemoryGallery::from_json_file(&path)?,
                None => InMemoryGallery::new(),
            };
            run_replay(&trace, gallery, &config, Arc::new(ledger))?;
        }
        Commands::User { gallery, action } => run_user(&gallery, action, &ledger)?,
    }

    Ok(())
}

fn open_ledger(path: &Path) -> Result<SqliteLedger> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating ledger directory {}", parent.display()))?;
    }
    Ok(SqliteLedger::open(path)?)
}

fn run_replay(
    trace: &Path,
    gallery: InMemoryGallery,
    config: &Config,
    ledger: Arc<dyn AuditLedger>,
) -> Result<()> {
    let mut source = replay::ReplaySource::new(trace);
    let mut session = Session::new(
        config.debounce(),
        replay::TraceMatcher::default(),
        gallery,
        ledger,
    );

    if let Err(e) = source.start() {
        session.record_start_failure(&e);
        return Err(e).with_context(|| format!("reading trace {}", trace.display()));
    }
    session.start();
    tracing::debug!(frames = source.remaining(), "replay starting");

    while let Some(frame) = source.next_frame() {
        let report = session.process(&frame);
        for (decision, overlay) in report.decisions.iter().zip(&report.overlays) {
            let who = match &decision.class {
                FaceClass::Known(id) => id.as_str(),
                FaceClass::Unknown => "unknown",
            };
            let verdict = match decision.verdict {
                Verdict::Emit => "emit".to_string(),
                Verdict::Suppressed { remaining } => {
                    format!("suppressed ({:.1}s)", remaining.as_secs_f64())
                }
            };
            let score = decision
                .match_score
                .map_or_else(|| "-".to_string(), |s| format!("{s:.3}"));
            println!(
                "{:>8.3}s  {:<12} score {:>7}  {:<20} {}",
                frame.offset, who, score, verdict, overlay.label
            );
        }
    }

    source.stop();
    session.stop();

    let status = session.status();
    println!(
        "{} frame(s), {} event(s) emitted, {} ledger failure(s)",
        status.frames_processed, status.events_emitted, status.ledger_failures
    );
    if status.ledger_degraded() {
        bail!("audit ledger degraded: {}", status.last_ledger_error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

/// Apply a gallery change, save it, and record the outcome either way.
fn run_user(path: &Path, action: UserAction, ledger: &dyn AuditLedger) -> Result<()> {
    let mut gallery = if path.exists() {
        InMemoryGallery::from_json_file(path)?
    } else {
        InMemoryGallery::new()
    };

    let (event, result): (fn(&str, Outcome) -> NewEvent, Result<()>) = match &action {
        UserAction::Enroll {
            id,
            name,
            embedding,
            photo,
        } => {
            let profile = SubjectProfile {
                subject_id: id.clone(),
                display_name: name.clone(),
                photo_path: photo.clone(),
            };
            let applied = gallery.enroll(profile, Embedding::new(embedding.clone()));
            (
                NewEvent::user_enrolled,
                save_if(applied, &gallery, path, || format!("subject {id} is already enrolled")),
            )
        }
        UserAction::Remove { id } => {
            let applied = gallery.remove(id);
            (
                NewEvent::user_removed,
                save_if(applied, &gallery, path, || format!("subject {id} is not enrolled")),
            )
        }
        UserAction::Photo { id, photo } => {
            let applied = gallery.update_photo(id, photo.clone());
            (
                NewEvent::user_photo_updated,
                save_if(applied, &gallery, path, || format!("subject {id} is not enrolled")),
            )
        }
    };

    let subject_id = match &action {
        UserAction::Enroll { id, .. } | UserAction::Remove { id } | UserAction::Photo { id, .. } => id,
    };
    ledger.append(&event(subject_id, Outcome::from_success(result.is_ok())))?;
    result?;

    if let Some(profile) = gallery.lookup(subject_id) {
        println!("{} ({})", profile.display_name, profile.subject_id);
    }
    println!("{} subject(s) enrolled", gallery.len());
    Ok(())
}

fn save_if(
    applied: bool,
    gallery: &InMemoryGallery,
    path: &Path,
    refusal: impl FnOnce() -> String,
) -> Result<()> {
    if !applied {
        bail!(refusal());
    }
    gallery.save_json_file(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_core::EventKind;

    fn recorded(ledger: &SqliteLedger) -> Vec<(EventKind, Outcome, Option<String>)> {
        ledger
            .export_range(Duration::from_secs(3600))
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.kind, e.outcome, e.subject_id)
            })
            .collect()
    }

    fn enroll(id: &str) -> UserAction {
        UserAction::Enroll {
            id: id.into(),
            name: "Alice".into(),
            embedding: vec![1.0, 0.0],
            photo: None,
        }
    }

    #[test]
    fn test_user_management_records_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        let ledger = SqliteLedger::open_in_memory().unwrap();

        run_user(&path, enroll("u1"), &ledger).unwrap();
        assert!(run_user(&path, enroll("u1"), &ledger).is_err());
        run_user(
            &path,
            UserAction::Photo {
                id: "u1".into(),
                photo: "alice.jpg".into(),
            },
            &ledger,
        )
        .unwrap();
        run_user(&path, UserAction::Remove { id: "u1".into() }, &ledger).unwrap();
        assert!(run_user(&path, UserAction::Remove { id: "u1".into() }, &ledger).is_err());

        let u1 = Some("u1".to_string());
        assert_eq!(
            recorded(&ledger),
            vec![
                (EventKind::UserEnrolled, Outcome::Success, u1.clone()),
                (EventKind::UserEnrolled, Outcome::Failure, u1.clone()),
                (EventKind::UserPhotoUpdated, Outcome::Success, u1.clone()),
                (EventKind::UserRemoved, Outcome::Success, u1.clone()),
                (EventKind::UserRemoved, Outcome::Failure, u1),
            ]
        );
        assert!(InMemoryGallery::from_json_file(&path).unwrap().is_empty());
    }

    #[test]
    fn test_replay_appends_debounced_events() {
        let dir = tempfile::tempdir().unwrap();
        let trace = dir.path().join("trace.jsonl");
        let face = r#"{"region": {"x": 0, "y": 0, "width": 10, "height": 10}, "embedding": [1.0, 0.0]}"#;
        std::fs::write(
            &trace,
            format!("{{\"t\": 0.0, \"faces\": [{face}]}}\n{{\"t\": 1.0, \"faces\": [{face}]}}\n{{\"t\": 3.5, \"faces\": [{face}]}}\n"),
        )
        .unwrap();

        let mut gallery = InMemoryGallery::new();
        gallery.enroll(
            SubjectProfile {
                subject_id: "u1".into(),
                display_name: "Alice".into(),
                photo_path: None,
            },
            Embedding::new(vec![1.0, 0.0]),
        );
        let config = Config::from_lookup(|_| None);
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        run_replay(&trace, gallery, &config, ledger.clone()).unwrap();

        let kinds: Vec<_> = recorded(&ledger).into_iter().map(|(k, o, _)| (k, o)).collect();
        assert_eq!(
            kinds,
            vec![
                (EventKind::CameraStarted, Outcome::Success),
                (EventKind::TemplatesReloaded, Outcome::Success),
                (EventKind::RecognitionAttempt, Outcome::Success),
                (EventKind::RecognitionAttempt, Outcome::Success),
                (EventKind::CameraStopped, Outcome::Success),
            ]
        );
    }

    #[test]
    fn test_replay_missing_trace_records_start_failure() {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let config = Config::from_lookup(|_| None);
        let result = run_replay(
            Path::new("/nonexistent/trace.jsonl"),
            InMemoryGallery::new(),
            &config,
            ledger.clone(),
        );
        assert!(result.is_err());
        let kinds: Vec<_> = recorded(&ledger).into_iter().map(|(k, o, _)| (k, o)).collect();
        assert_eq!(kinds, vec![(EventKind::CameraStarted, Outcome::Failure)]);
    }
}
