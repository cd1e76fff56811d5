use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::enroll::{self, EnrollError};
use rollcall_core::store::StudentStore;
use rollcall_core::{Descriptor, EndReason, EuclideanMatcher, Gallery, GalleryError, SessionMachine};
use rollcall_store::Database;
use std::io::{BufRead, Read};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod directory;
mod engine;
mod export;
mod feed;

use config::Config;
use engine::{Interrupted, SessionContext, SessionEvent, SessionReport, SessionSignal};
use feed::{FeedEncoder, JsonlFeed};

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition classroom attendance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a new student
    Enroll {
        /// Student's full name
        #[arg(short, long)]
        name: String,
        /// JSON array with the face descriptor (file path, or `-` for stdin)
        #[arg(short, long, conflicts_with = "from_feed", required_unless_present = "from_feed")]
        descriptor: Option<String>,
        /// Take the first face seen on a detection feed instead
        #[arg(long)]
        from_feed: Option<String>,
    },
    /// Recognize faces from a detection feed and mark attendance
    StartSession {
        /// Class the attendance is recorded for
        #[arg(short, long)]
        class: String,
        /// JSON-lines detection feed (file path, or `-` for stdin)
        #[arg(short, long, default_value = "-")]
        feed: String,
        /// Seconds without any face before the session ends
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Match threshold (Euclidean distance, exclusive)
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// List all registered students
    ListStudents,
    /// Search for a student by ID
    FindStudent {
        /// Student ID (case-insensitive)
        uid: String,
    },
    /// Export a class's attendance to CSV
    Export {
        #[arg(short, long)]
        class: String,
    },
    /// Drop and recreate all tables
    Reset {
        /// Confirm that every student and attendance record is deleted
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = Config::load()?;
    tracing::debug!(db = %cfg.db_path.display(), "configuration loaded");

    let db = Database::open(&cfg.db_path)
        .with_context(|| format!("opening database {}", cfg.db_path.display()))?;

    match cli.command {
        Commands::Enroll {
            name,
            descriptor,
            from_feed,
        } => cmd_enroll(&db, &cfg, &name, descriptor, from_feed)?,
        Commands::StartSession {
            class,
            feed,
            timeout_secs,
            threshold,
        } => cmd_start_session(Arc::new(db), &cfg, &class, &feed, timeout_secs, threshold).await?,
        Commands::ListStudents => {
            let students = db.list_students()?;
            println!("{}", directory::render_students(&students));
        }
        Commands::FindStudent { uid } => {
            let (uid, found) = directory::find_student(&db, &uid)?;
            println!("{}", directory::render_lookup(&uid, found.as_ref()));
        }
        Commands::Export { class } => {
            let today = chrono::Local::now().date_naive();
            match export::export_class(&db, class.trim(), &cfg.export_dir, today)? {
                Some(exported) => println!("Attendance exported to {}", exported.path.display()),
                None => println!("No attendance records to export."),
            }
        }
        Commands::Reset { yes } => {
            if !yes {
                bail!("refusing to reset the database without --yes");
            }
            db.reset()?;
            println!("Database reset: all students and attendance records removed.");
        }
    }

    Ok(())
}

fn cmd_enroll(
    db: &Database,
    cfg: &Config,
    name: &str,
    descriptor: Option<String>,
    from_feed: Option<String>,
) -> Result<()> {
    let descriptor = match (descriptor, from_feed) {
        (Some(src), _) => read_descriptor(&src)?,
        (None, Some(path)) => {
            let mut source = JsonlFeed::open(&path)?;
            println!("Please look at the camera.");
            match feed::first_face(&mut source, &mut FeedEncoder)? {
                Some(face) => face,
                None => {
                    println!("Could not capture face. Please try again.");
                    return Ok(());
                }
            }
        }
        (None, None) => bail!("either --descriptor or --from-feed is required"),
    };

    match enroll::enroll(db, name, &descriptor, cfg.descriptor_dim) {
        Ok(enrolled) => {
            println!(
                "Student {} added successfully with ID: {}",
                enrolled.name, enrolled.uid
            );
            Ok(())
        }
        Err(EnrollError::Validation(err)) => {
            println!("Error adding student: {err}");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Parse a descriptor given as a JSON array of numbers.
fn read_descriptor(src: &str) -> Result<Descriptor> {
    let raw = if src == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(src).with_context(|| format!("reading descriptor {src}"))?
    };
    serde_json::from_str(&raw).with_context(|| format!("parsing descriptor {src}"))
}

async fn cmd_start_session(
    db: Arc<Database>,
    cfg: &Config,
    class: &str,
    feed_path: &str,
    timeout_secs: Option<u64>,
    threshold: Option<f64>,
) -> Result<()> {
    let load = match Gallery::load_established(&*db, cfg.descriptor_dim) {
        Ok(load) => load,
        Err(GalleryError::EmptyGallery) => {
            println!("No students found in database. Please add students first.");
            return Ok(());
        }
        Err(GalleryError::NoUsableRecords { skipped }) => {
            for err in &skipped {
                println!("Warning: {err}");
            }
            println!("None of the {} enrolled students has a usable face descriptor.", skipped.len());
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    for skipped in &load.skipped {
        println!("Warning: {skipped}");
    }

    let timeout_secs = timeout_secs.unwrap_or(cfg.idle_timeout_secs);
    let idle_timeout = i64::try_from(timeout_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .context("idle timeout out of range")?;
    let gallery = Arc::new(load.gallery);
    let machine = SessionMachine::new(class, gallery.len(), idle_timeout)?;
    let source = JsonlFeed::open(feed_path)?;

    println!("\nAttendance session started for class: {}", machine.class_name());
    if feed_path == "-" {
        println!("Press Ctrl-C to quit, or wait {timeout_secs} seconds without faces to auto-exit");
    } else {
        println!("Press Ctrl-C (or type 'q') to quit, or wait {timeout_secs} seconds without faces to auto-exit");
    }
    println!("The session stops after the current frame; press Ctrl-C twice to exit immediately");
    println!("Detected students will be marked present automatically\n");

    let ctx = SessionContext {
        gallery,
        matcher: EuclideanMatcher,
        threshold: threshold.unwrap_or(cfg.match_threshold),
        ledger: db,
        export_dir: cfg.export_dir.clone(),
    };
    let mut handle = engine::spawn_session(ctx, machine, source, FeedEncoder)?;

    let quit = handle.signals();
    tokio::spawn(async move {
        let next_interrupt = || async { tokio::signal::ctrl_c().await.is_ok() };
        if engine::relay_interrupts(next_interrupt, quit).await == Interrupted::Forced {
            eprintln!("\nInterrupted again; exiting without waiting for the session.");
            std::process::exit(130);
        }
    });
    if feed_path != "-" {
        watch_stdin_for_quit(handle.signals());
    }

    while let Some(event) = handle.events.recv().await {
        print_event(&event, timeout_secs);
    }
    let report = handle.finished().await?;
    print_report(&report);
    Ok(())
}

/// Send a quit signal when a line reading `q` arrives on stdin.
fn watch_stdin_for_quit(quit: tokio::sync::mpsc::Sender<SessionSignal>) {
    let spawned = std::thread::Builder::new()
        .name("rollcall-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    let _ = quit.blocking_send(SessionSignal::Quit);
                    break;
                }
            }
        });
    if let Err(err) = spawned {
        tracing::warn!(error = %err, "stdin quit watcher not started");
    }
}

fn print_event(event: &SessionEvent, timeout_secs: u64) {
    match event {
        SessionEvent::Marked { uid, name } => println!("✓ Marked {name} ({uid}) as present."),
        SessionEvent::WriteFailed { uid, error } => {
            println!("Error: could not record attendance for {uid}: {error}")
        }
        SessionEvent::NoFace { remaining_secs } => {
            if *remaining_secs % 10 == 0 || *remaining_secs <= 5 {
                println!("No faces detected. Auto-exit in {remaining_secs}s");
            }
        }
        SessionEvent::Ended(EndReason::IdleTimeout) => println!(
            "\nNo faces detected for {timeout_secs} seconds. Ending attendance session."
        ),
        SessionEvent::Ended(EndReason::UserQuit) => println!("\nAttendance session ended by user."),
        SessionEvent::Ended(EndReason::CameraError) => {
            println!("\nError: Could not read frame from camera.")
        }
    }
}

fn print_report(report: &SessionReport) {
    let summary = &report.summary;
    println!("\nAttendance session completed!");
    println!(
        "Total students marked present: {}/{}",
        summary.marked, summary.gallery_size
    );
    match &report.export {
        None | Some(Ok(None)) => println!("No attendance records to export."),
        Some(Ok(Some(exported))) => println!("Attendance exported to {}", exported.path.display()),
        Some(Err(err)) => {
            tracing::error!(class = %summary.class_name, error = %err, "export failed");
            println!("Error: could not export attendance: {err}");
        }
    }
}
