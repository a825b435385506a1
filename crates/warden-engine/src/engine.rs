use crate::session::{Session, SessionStatus};
use crate::source::{FrameSource, SourceError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use warden_core::{FaceMatcher, FaceOverlay, Gallery};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("frame source error: {0}")]
    Source(#[from] SourceError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
    #[error("session thread exited")]
    ChannelClosed,
}

/// Messages sent from handles to the session thread.
enum SessionRequest {
    Start {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    ReloadTemplates {
        reply: oneshot::Sender<usize>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Clone-safe handle to the session thread. The thread stops the session
/// and exits once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionRequest>,
    overlays: watch::Receiver<Vec<FaceOverlay>>,
}

impl SessionHandle {
    /// Start the frame source and begin processing. A source that refuses
    /// to start is recorded in the ledger and reported here.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.request(|reply| SessionRequest::Start { reply }).await?
    }

    /// Stop processing. Returns once the stop has been recorded.
    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| SessionRequest::Stop { reply }).await
    }

    /// Re-read templates after enrollment changes. Returns the number loaded.
    pub async fn reload_templates(&self) -> Result<usize, EngineError> {
        self.request(|reply| SessionRequest::ReloadTemplates { reply })
            .await
    }

    pub async fn status(&self) -> Result<SessionStatus, EngineError> {
        self.request(|reply| SessionRequest::Status { reply }).await
    }

    /// Overlays of the most recently processed frame; empty when stopped.
    pub fn overlays(&self) -> watch::Receiver<Vec<FaceOverlay>> {
        self.overlays.clone()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Run a session on a dedicated OS thread.
///
/// While stopped the thread blocks on requests. While running it reads one
/// frame per `tick`, processes it, and publishes its overlays, checking for
/// requests between frames.
pub fn spawn_session<S, M, G>(
    mut source: S,
    mut session: Session<M, G>,
    tick: Duration,
) -> Result<SessionHandle, EngineError>
where
    S: FrameSource + Send + 'static,
    M: FaceMatcher<S::Frame> + Send + 'static,
    G: Gallery + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<SessionRequest>(8);
    let (overlay_tx, overlay_rx) = watch::channel(Vec::new());

    std::thread::Builder::new()
        .name("warden-session".into())
        .spawn(move || {
            tracing::info!(tick_ms = tick.as_millis() as u64, "session thread started");
            loop {
                let request = if session.is_running() {
                    match rx.try_recv() {
                        Ok(req) => Some(req),
                        Err(TryRecvError::Empty) => None,
                        Err(TryRecvError::Disconnected) => break,
                    }
                } else {
                    match rx.blocking_recv() {
                        Some(req) => Some(req),
                        None => break,
                    }
                };

                match request {
                    Some(req) => handle_request(req, &mut source, &mut session, &overlay_tx),
                    None => {
                        match source.next_frame() {
                            Some(frame) => {
                                let report = session.process(&frame);
                                overlay_tx.send_replace(report.overlays);
                            }
                            None => tracing::trace!("no frame this tick"),
                        }
                        std::thread::sleep(tick);
                    }
                }
            }

            if session.is_running() {
                source.stop();
                session.stop();
            }
            tracing::info!("session thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(SessionHandle {
        tx,
        overlays: overlay_rx,
    })
}

fn handle_request<S, M, G>(
    req: SessionRequest,
    source: &mut S,
    session: &mut Session<M, G>,
    overlay_tx: &watch::Sender<Vec<FaceOverlay>>,
) where
    S: FrameSource,
    G: Gallery,
{
    match req {
        SessionRequest::Start { reply } => {
            let result = if session.is_running() {
                Ok(())
            } else {
                match source.start() {
                    Ok(()) => {
                        session.start();
                        Ok(())
                    }
                    Err(e) => {
                        session.record_start_failure(&e);
                        Err(EngineError::Source(e))
                    }
                }
            };
            let _ = reply.send(result);
        }
        SessionRequest::Stop { reply } => {
            if session.is_running() {
                source.stop();
                session.stop();
                overlay_tx.send_replace(Vec::new());
            }
            let _ = reply.send(());
        }
        SessionRequest::ReloadTemplates { reply } => {
            let _ = reply.send(session.reload_templates());
        }
        SessionRequest::Status { reply } => {
            let _ = reply.send(session.status().clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{gallery, known, ScriptedFrame, ScriptedMatcher};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;
    use warden_core::{DebounceConfig, EventKind, Outcome, OverlayColor};
    use warden_ledger::{AuditLedger, SqliteLedger};

    /// Source that shows the same known face on every tick.
    struct LoopSource {
        fail_start: bool,
        started: Arc<AtomicBool>,
    }

    impl FrameSource for LoopSource {
        type Frame = ScriptedFrame;

        fn start(&mut self) -> Result<(), SourceError> {
            if self.fail_start {
                return Err(SourceError::Unavailable("camera busy".into()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn next_frame(&mut self) -> Option<ScriptedFrame> {
            Some(ScriptedFrame {
                at: Instant::now(),
                faces: vec![known(0.2)],
            })
        }

        fn stop(&mut self) {
            self.started.store(false, Ordering::SeqCst);
        }
    }

    fn spawn(fail_start: bool) -> (SessionHandle, Arc<SqliteLedger>, Arc<AtomicBool>) {
        let ledger = Arc::new(SqliteLedger::open_in_memory().unwrap());
        let started = Arc::new(AtomicBool::new(false));
        let source = LoopSource {
            fail_start,
            started: Arc::clone(&started),
        };
        let session = Session::new(
            DebounceConfig::default(),
            ScriptedMatcher,
            gallery(),
            ledger.clone(),
        );
        let handle = spawn_session(source, session, Duration::from_millis(5)).unwrap();
        (handle, ledger, started)
    }

    async fn wait_for_frames(handle: &SessionHandle, frames: u64) -> SessionStatus {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = handle.status().await.unwrap();
            if status.frames_processed >= frames || Instant::now() > deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn recorded(ledger: &SqliteLedger) -> Vec<(EventKind, Outcome)> {
        ledger
            .export_range(Duration::from_secs(3600))
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                (e.kind, e.outcome)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_start_process_stop() {
        let (handle, ledger, started) = spawn(false);
        handle.start().await.unwrap();
        assert!(started.load(Ordering::SeqCst));

        let status = wait_for_frames(&handle, 3).await;
        assert!(status.running);
        assert!(status.frames_processed >= 3);
        // Same subject within its cooldown: one event only.
        assert_eq!(status.events_emitted, 1);

        let overlays = handle.overlays().borrow().clone();
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].color, OverlayColor::Yellow);

        handle.stop().await.unwrap();
        assert!(!started.load(Ordering::SeqCst));
        assert!(handle.overlays().borrow().is_empty());
        assert!(!handle.status().await.unwrap().running);

        assert_eq!(
            recorded(&ledger),
            vec![
                (EventKind::CameraStarted, Outcome::Success),
                (EventKind::TemplatesReloaded, Outcome::Success),
                (EventKind::RecognitionAttempt, Outcome::Success),
                (EventKind::CameraStopped, Outcome::Success),
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_emits_again() {
        let (handle, ledger, _) = spawn(false);
        handle.start().await.unwrap();
        wait_for_frames(&handle, 1).await;
        handle.stop().await.unwrap();
        let before = handle.status().await.unwrap().frames_processed;

        handle.start().await.unwrap();
        let status = wait_for_frames(&handle, before + 1).await;
        assert_eq!(status.events_emitted, 2);
        handle.stop().await.unwrap();

        let recognitions = recorded(&ledger)
            .into_iter()
            .filter(|(k, _)| *k == EventKind::RecognitionAttempt)
            .count();
        assert_eq!(recognitions, 2);
    }

    #[tokio::test]
    async fn test_source_start_failure() {
        let (handle, ledger, _) = spawn(true);
        let err = handle.start().await.unwrap_err();
        assert!(matches!(err, EngineError::Source(SourceError::Unavailable(_))));
        assert!(!handle.status().await.unwrap().running);
        assert_eq!(
            recorded(&ledger),
            vec![(EventKind::CameraStarted, Outcome::Failure)]
        );
    }

    #[tokio::test]
    async fn test_reload_templates_through_handle() {
        let (handle, ledger, _) = spawn(false);
        assert_eq!(handle.reload_templates().await.unwrap(), 1);
        assert_eq!(handle.status().await.unwrap().templates_loaded, 1);
        assert_eq!(ledger.event_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dropping_handles_stops_session() {
        let (handle, ledger, started) = spawn(false);
        handle.start().await.unwrap();
        wait_for_frames(&handle, 1).await;
        drop(handle);

        let deadline = Instant::now() + Duration::from_secs(5);
        while started.load(Ordering::SeqCst) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!started.load(Ordering::SeqCst));
        // The source is stopped before the stop event is written.
        while recorded(&ledger).last() != Some(&(EventKind::CameraStopped, Outcome::Success))
            && Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(
            recorded(&ledger).last(),
            Some(&(EventKind::CameraStopped, Outcome::Success))
        );
    }
}
