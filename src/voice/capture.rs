//! Process-wide capture buffer
//!
//! One utterance accumulates here across datagrams. The buffer is owned by
//! a single task; the datagram listener and sessions talk to it through a
//! [`CaptureHandle`], so appends and drains are serialized without locks.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::{Error, Result};

/// Capture sample rate (16kHz mono 16-bit)
pub const SAMPLE_RATE: u32 = 16000;

/// Buffer is cleared after this long without datagrams
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How often the idle sweep runs
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Accumulated PCM for the in-progress utterance
///
/// Only whole samples are stored, so the length is always even.
#[derive(Debug)]
pub struct CaptureBuffer {
    data: Vec<u8>,
    last_activity: Option<Instant>,
    idle_timeout: Duration,
}

impl Default for CaptureBuffer {
    fn default() -> Self {
        Self::new(IDLE_TIMEOUT)
    }
}

impl CaptureBuffer {
    /// Create an empty buffer with the given idle timeout
    #[must_use]
    pub const fn new(idle_timeout: Duration) -> Self {
        Self {
            data: Vec::new(),
            last_activity: None,
            idle_timeout,
        }
    }

    /// Append conditioned PCM and mark activity at `now`
    ///
    /// A trailing odd byte is dropped.
    pub fn append(&mut self, chunk: &[u8], now: Instant) {
        let whole = chunk.len() & !1;
        self.data.extend_from_slice(&chunk[..whole]);
        self.last_activity = Some(now);
    }

    /// Take the buffered bytes, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    /// Discard the buffered bytes
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Clear the buffer if nothing arrived within the idle timeout
    ///
    /// Returns true if bytes were discarded.
    pub fn evict_if_idle(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_activity else {
            return false;
        };

        if self.data.is_empty() || now.saturating_duration_since(last) <= self.idle_timeout {
            return false;
        }

        self.data.clear();
        true
    }

    /// Buffered byte count
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing is buffered
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// When the last datagram arrived
    #[must_use]
    pub const fn last_activity(&self) -> Option<Instant> {
        self.last_activity
    }
}

/// Snapshot published whenever the buffer changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStatus {
    /// Buffered byte count
    pub buffered_bytes: usize,
    /// Datagrams appended since startup
    pub datagrams: u64,
    /// When the last datagram arrived
    pub last_activity: Option<Instant>,
}

impl CaptureStatus {
    /// Buffered audio duration in milliseconds at the capture rate
    #[must_use]
    pub fn buffered_ms(&self) -> u64 {
        (self.buffered_bytes as u64 / 2) * 1000 / u64::from(SAMPLE_RATE)
    }
}

enum Command {
    Append(Vec<u8>),
    Drain(oneshot::Sender<Vec<u8>>),
    Clear,
}

/// Cloneable handle to the capture task
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Append(chunk) => write!(f, "Append({} bytes)", chunk.len()),
            Self::Drain(_) => write!(f, "Drain"),
            Self::Clear => write!(f, "Clear"),
        }
    }
}

impl CaptureHandle {
    /// Queue conditioned PCM for appending
    ///
    /// Never waits; a stopped capture task drops the chunk.
    pub fn append(&self, chunk: Vec<u8>) {
        if self.tx.send(Command::Append(chunk)).is_err() {
            tracing::warn!("capture task stopped, dropping datagram");
        }
    }

    /// Atomically take the buffered utterance and reset the buffer
    ///
    /// # Errors
    ///
    /// Returns error if the capture task has stopped
    pub async fn drain(&self) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Command::Drain(reply_tx))
            .map_err(|_| Error::Audio("capture task stopped".to_string()))?;

        reply_rx
            .await
            .map_err(|_| Error::Audio("capture task dropped drain request".to_string()))
    }

    /// Discard whatever is buffered
    pub fn clear(&self) {
        if self.tx.send(Command::Clear).is_err() {
            tracing::warn!("capture task stopped, clear ignored");
        }
    }
}

/// Running capture task
pub struct CaptureTask {
    /// Handle for appending and draining
    pub handle: CaptureHandle,
    /// Status updates for the status surface
    pub status: watch::Receiver<CaptureStatus>,
    /// Task join handle; ends once every handle is dropped
    pub join: JoinHandle<()>,
}

/// Spawn the task that owns the capture buffer
///
/// The task also sweeps the buffer every `sweep_interval`, clearing it once
/// `idle_timeout` passes without an append.
#[must_use]
pub fn spawn_capture(idle_timeout: Duration, sweep_interval: Duration) -> CaptureTask {
    let (tx, rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(CaptureStatus::default());

    let join = tokio::spawn(run_capture(
        CaptureBuffer::new(idle_timeout),
        rx,
        status_tx,
        sweep_interval,
    ));

    CaptureTask {
        handle: CaptureHandle { tx },
        status: status_rx,
        join,
    }
}

async fn run_capture(
    mut buffer: CaptureBuffer,
    mut rx: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<CaptureStatus>,
    sweep_interval: Duration,
) {
    let mut sweep = tokio::time::interval(sweep_interval);
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut datagrams = 0u64;

    loop {
        tokio::select! {
            command = rx.recv() => {
                let Some(command) = command else {
                    tracing::debug!("capture handles dropped, stopping capture task");
                    break;
                };

                match command {
                    Command::Append(chunk) => {
                        buffer.append(&chunk, now());
                        datagrams += 1;
                    }
                    Command::Drain(reply) => {
                        let bytes = buffer.drain();
                        tracing::debug!(bytes = bytes.len(), "capture buffer drained");
                        if let Err(bytes) = reply.send(bytes) {
                            // Requester went away; keep the audio for the next session
                            buffer.append(&bytes, buffer.last_activity().unwrap_or_else(now));
                        }
                    }
                    Command::Clear => buffer.clear(),
                }
            }
            _ = sweep.tick() => {
                if buffer.evict_if_idle(now()) {
                    tracing::info!("capture buffer idle, discarding stale audio");
                }
            }
        }

        publish(&status, &buffer, datagrams);
    }
}

/// Current time on the runtime clock (follows paused time in tests)
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn publish(status: &watch::Sender<CaptureStatus>, buffer: &CaptureBuffer, datagrams: u64) {
    status.send_if_modified(|current| {
        let len_changed = current.buffered_bytes != buffer.len();
        if len_changed {
            tracing::debug!(
                from = current.buffered_bytes,
                to = buffer.len(),
                "capture buffer length changed"
            );
        }

        let next = CaptureStatus {
            buffered_bytes: buffer.len(),
            datagrams,
            last_activity: buffer.last_activity(),
        };
        let changed = *current != next;
        *current = next;
        changed
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keeps_whole_samples_only() {
        let mut buffer = CaptureBuffer::default();
        let now = Instant::now();

        buffer.append(&[1, 2, 3], now);
        assert_eq!(buffer.len(), 2);

        buffer.append(&[4, 5], now);
        assert_eq!(buffer.drain(), vec![1, 2, 4, 5]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn idle_buffer_is_evicted() {
        let mut buffer = CaptureBuffer::default();
        let start = Instant::now();
        buffer.append(&[0; 64], start);

        assert!(!buffer.evict_if_idle(start + Duration::from_secs(60)));
        assert_eq!(buffer.len(), 64);

        assert!(buffer.evict_if_idle(start + IDLE_TIMEOUT + Duration::from_secs(1)));
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn recent_activity_defers_eviction() {
        let mut buffer = CaptureBuffer::default();
        let start = Instant::now();
        buffer.append(&[0; 8], start);
        buffer.append(&[0; 8], start + Duration::from_secs(240));

        assert!(!buffer.evict_if_idle(start + Duration::from_secs(360)));
        assert_eq!(buffer.len(), 16);
    }

    #[test]
    fn status_reports_duration() {
        let status = CaptureStatus {
            buffered_bytes: 32_000,
            datagrams: 10,
            last_activity: None,
        };
        assert_eq!(status.buffered_ms(), 1000);
    }

    #[tokio::test]
    async fn drain_returns_appends_in_order() {
        let task = spawn_capture(IDLE_TIMEOUT, SWEEP_INTERVAL);
        task.handle.append(vec![1, 0]);
        task.handle.append(vec![2, 0]);

        assert_eq!(task.handle.drain().await.unwrap(), vec![1, 0, 2, 0]);
        assert!(task.handle.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_discards_buffer() {
        let task = spawn_capture(IDLE_TIMEOUT, SWEEP_INTERVAL);
        task.handle.append(vec![1, 0, 2, 0]);
        task.handle.clear();

        assert!(task.handle.drain().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_follows_length() {
        let task = spawn_capture(IDLE_TIMEOUT, SWEEP_INTERVAL);
        let mut status = task.status.clone();

        task.handle.append(vec![0; 10]);
        status.changed().await.unwrap();
        assert_eq!(status.borrow_and_update().buffered_bytes, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_clears_after_idle_timeout() {
        let task = spawn_capture(IDLE_TIMEOUT, SWEEP_INTERVAL);
        task.handle.append(vec![0; 100]);
        tokio::task::yield_now().await;

        tokio::time::sleep(IDLE_TIMEOUT + Duration::from_secs(10)).await;

        assert!(task.handle.drain().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_keeps_recent_audio() {
        let task = spawn_capture(IDLE_TIMEOUT, SWEEP_INTERVAL);
        task.handle.append(vec![0; 100]);
        tokio::task::yield_now().await;

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(task.handle.drain().await.unwrap().len(), 100);
    }
}
