use crate::export::{self, ExportError, Exported};
use chrono::{Local, NaiveDate};
use rollcall_core::source::{FaceEncoder, FrameSource};
use rollcall_core::{
    AttendanceLedger, EndReason, Gallery, Matcher, SessionMachine, SessionSummary, Uid,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
    #[error("session thread exited without a report")]
    ChannelClosed,
}

/// Signals from the presentation/input layer into a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    Quit,
}

/// How [`relay_interrupts`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    /// A second interrupt arrived before the process exited.
    Forced,
    /// The interrupt source closed.
    Closed,
}

/// Progress notifications from the session thread, for display only.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Marked { uid: Uid, name: String },
    WriteFailed { uid: Uid, error: String },
    /// No face visible; whole seconds left before the idle timeout.
    NoFace { remaining_secs: i64 },
    Ended(EndReason),
}

/// Final result of one session.
#[derive(Debug)]
pub struct SessionReport {
    pub summary: SessionSummary,
    /// `None` when nobody was marked and export was not attempted.
    pub export: Option<Result<Option<Exported>, ExportError>>,
}

/// Everything a session needs besides its frame source and the state machine.
pub struct SessionContext<M, L: ?Sized> {
    pub gallery: Arc<Gallery>,
    pub matcher: M,
    pub threshold: f64,
    pub ledger: Arc<L>,
    pub export_dir: PathBuf,
}

/// Handle to a session running on its own thread.
pub struct SessionHandle {
    signals: mpsc::Sender<SessionSignal>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    report: oneshot::Receiver<SessionReport>,
}

impl SessionHandle {
    /// Sender for quit signals; clone it into input handlers.
    pub fn signals(&self) -> mpsc::Sender<SessionSignal> {
        self.signals.clone()
    }

    /// Wait for the session to finish and return its report.
    pub async fn finished(self) -> Result<SessionReport, EngineError> {
        self.report.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Run a session on a dedicated OS thread.
///
/// Frames are read, resolved, and applied strictly in order on that thread;
/// the returned handle only feeds quit signals in and reads progress out.
pub fn spawn_session<S, E, M, L>(
    ctx: SessionContext<M, L>,
    mut machine: SessionMachine,
    mut source: S,
    mut encoder: E,
) -> Result<SessionHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    E: FaceEncoder<Payload = S::Payload> + Send + 'static,
    M: Matcher + Send + 'static,
    L: AttendanceLedger + Send + Sync + ?Sized + 'static,
{
    let (signal_tx, mut signal_rx) = mpsc::channel::<SessionSignal>(4);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (report_tx, report_rx) = oneshot::channel();

    std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || {
            tracing::info!(class = machine.class_name(), "session thread started");
            let summary = run_session(
                &ctx,
                &mut machine,
                &mut source,
                &mut encoder,
                &mut signal_rx,
                &event_tx,
            );
            let export = finish_session(&ctx, &summary, Local::now().date_naive());
            let _ = report_tx.send(SessionReport { summary, export });
            tracing::info!("session thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(SessionHandle {
        signals: signal_tx,
        events: event_rx,
        report: report_rx,
    })
}

/// Turn interrupts into session signals.
///
/// The first interrupt asks the session to quit at the next frame boundary.
/// The engine thread may be blocked reading a frame, so a second interrupt
/// returns [`Interrupted::Forced`] and the caller exits without waiting.
pub async fn relay_interrupts<F, Fut>(
    mut next_interrupt: F,
    quit: mpsc::Sender<SessionSignal>,
) -> Interrupted
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    if !next_interrupt().await {
        return Interrupted::Closed;
    }
    tracing::info!("interrupt received; stopping session");
    let _ = quit.send(SessionSignal::Quit).await;

    if next_interrupt().await {
        tracing::warn!("second interrupt; abandoning session");
        Interrupted::Forced
    } else {
        Interrupted::Closed
    }
}

/// Drive the state machine until it finishes.
///
/// Quit signals are checked once per frame boundary. Ledger writes happen
/// synchronously inside [`SessionMachine::observe`], so none is in flight
/// when the loop exits.
pub fn run_session<S, E, M, L>(
    ctx: &SessionContext<M, L>,
    machine: &mut SessionMachine,
    source: &mut S,
    encoder: &mut E,
    signals: &mut mpsc::Receiver<SessionSignal>,
    events: &mpsc::UnboundedSender<SessionEvent>,
) -> SessionSummary
where
    S: FrameSource,
    E: FaceEncoder<Payload = S::Payload>,
    M: Matcher,
    L: AttendanceLedger + ?Sized,
{
    let mut last_countdown: Option<i64> = None;

    while !machine.is_finished() {
        match signals.try_recv() {
            Ok(SessionSignal::Quit) => {
                tracing::info!("quit requested");
                machine.quit();
                break;
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }

        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::warn!("frame source ended");
                machine.camera_failed();
                break;
            }
            Err(err) => {
                tracing::error!(error = %err, "could not read frame");
                machine.camera_failed();
                break;
            }
        };

        let descriptors = match encoder.encode(&frame) {
            Ok(descriptors) => descriptors,
            Err(err) => {
                tracing::warn!(sequence = frame.sequence, error = %err, "skipping frame");
                continue;
            }
        };

        let sightings = ctx.matcher.resolve_all(&descriptors, &ctx.gallery, ctx.threshold);
        tracing::trace!(sequence = frame.sequence, faces = sightings.len(), "frame resolved");
        let outcome = machine.observe(&sightings, frame.captured_at, &*ctx.ledger);

        for uid in outcome.marked {
            let name = ctx.gallery.get(&uid).map(|e| e.name.clone()).unwrap_or_default();
            let _ = events.send(SessionEvent::Marked { uid, name });
        }
        for (uid, err) in outcome.failed {
            let _ = events.send(SessionEvent::WriteFailed {
                uid,
                error: err.to_string(),
            });
        }

        let countdown = machine
            .remaining_idle(frame.captured_at)
            .map(|left| left.num_seconds());
        if countdown != last_countdown {
            if let Some(remaining_secs) = countdown {
                let _ = events.send(SessionEvent::NoFace { remaining_secs });
            }
            last_countdown = countdown;
        }
    }

    let summary = match machine.summary() {
        Some(summary) => summary,
        None => {
            machine.quit();
            SessionSummary {
                class_name: machine.class_name().to_string(),
                reason: EndReason::UserQuit,
                marked: machine.marked().len(),
                gallery_size: machine.gallery_size(),
            }
        }
    };
    let _ = events.send(SessionEvent::Ended(summary.reason));

    tracing::info!(
        class = %summary.class_name,
        reason = %summary.reason,
        marked = summary.marked,
        total = summary.gallery_size,
        "session finished"
    );
    summary
}

/// Export the class's attendance if this session marked anyone.
pub fn finish_session<M, L>(
    ctx: &SessionContext<M, L>,
    summary: &SessionSummary,
    date: NaiveDate,
) -> Option<Result<Option<Exported>, ExportError>>
where
    L: AttendanceLedger + ?Sized,
{
    if summary.marked == 0 {
        return None;
    }
    Some(export::export_class(
        &*ctx.ledger,
        &summary.class_name,
        &ctx.export_dir,
        date,
    ))
}
