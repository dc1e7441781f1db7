//! Scan progress events
//!
//! The pipeline reports progress as messages on a broadcast channel rather
//! than mutating shared state; any number of consumers (API layers, loggers,
//! tests) can subscribe without coupling to the orchestrator. Lagging
//! subscribers lose old events, never block the pipeline.

use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Pipeline phase a progress event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Scanning,
    FetchingMetadata,
    FetchingEpisodes,
    Saving,
    /// Terminal event carrying the run summary
    Complete,
}

impl ScanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanPhase::Scanning => "scanning",
            ScanPhase::FetchingMetadata => "fetching_metadata",
            ScanPhase::FetchingEpisodes => "fetching_episodes",
            ScanPhase::Saving => "saving",
            ScanPhase::Complete => "complete",
        }
    }

    /// Overall percentage band for this phase; each working phase owns a
    /// quarter, the terminal event is pinned at 100
    pub fn band(&self) -> (u8, u8) {
        match self {
            ScanPhase::Scanning => (0, 25),
            ScanPhase::FetchingMetadata => (25, 50),
            ScanPhase::FetchingEpisodes => (50, 75),
            ScanPhase::Saving => (75, 100),
            ScanPhase::Complete => (100, 100),
        }
    }
}

/// One progress report
#[derive(Debug, Clone)]
pub struct ScanProgressEvent {
    pub library_id: Uuid,
    pub scan_job_id: Uuid,
    pub phase: ScanPhase,
    /// Overall progress, 0-100, monotonic within one scan
    pub progress: u8,
    pub current: usize,
    pub total: usize,
    pub message: String,
}

/// Broadcast sender with per-scan accounting baked in
#[derive(Clone)]
pub struct ProgressReporter {
    tx: broadcast::Sender<ScanProgressEvent>,
    library_id: Uuid,
    scan_job_id: Uuid,
}

/// Emit one event per this many items within a phase, plus the last item
const REPORT_EVERY: usize = 5;

impl ProgressReporter {
    /// Bind an existing sender to one scan's identity
    pub fn new(
        tx: broadcast::Sender<ScanProgressEvent>,
        library_id: Uuid,
        scan_job_id: Uuid,
    ) -> Self {
        Self { tx, library_id, scan_job_id }
    }

    pub fn channel(
        capacity: usize,
        library_id: Uuid,
        scan_job_id: Uuid,
    ) -> (Self, broadcast::Receiver<ScanProgressEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx, library_id, scan_job_id }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgressEvent> {
        self.tx.subscribe()
    }

    /// Report progress within a phase. Emits at a fixed item cadence to
    /// avoid flooding subscribers on large libraries.
    pub fn report(&self, phase: ScanPhase, current: usize, total: usize, message: &str) {
        if total > 0 && current % REPORT_EVERY != 0 && current != total {
            return;
        }
        self.emit(phase, current, total, message);
    }

    /// Report unconditionally (phase transitions, terminal events)
    pub fn emit(&self, phase: ScanPhase, current: usize, total: usize, message: &str) {
        let event = ScanProgressEvent {
            library_id: self.library_id,
            scan_job_id: self.scan_job_id,
            phase,
            progress: phase_progress(phase, current, total),
            current,
            total,
            message: message.to_string(),
        };

        debug!(
            phase = phase.as_str(),
            progress = event.progress,
            current = current,
            total = total,
            "{}", message
        );

        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

/// Map per-phase completion onto the phase's overall percentage band
fn phase_progress(phase: ScanPhase, current: usize, total: usize) -> u8 {
    let (start, end) = phase.band();
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    let done = current.min(total);
    (start as usize + span * done / total) as u8
}
