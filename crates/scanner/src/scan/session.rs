//! Scan session state
//!
//! One [`ScanSession`] holds everything that belongs to a single in-progress
//! scan: the snapshot being enriched, the ordered queue of privileged
//! targets, the cursor, the timer handles, and the reply channel. The session
//! is created and destroyed through a single constructor/finalizer pair;
//! [`ScanSession::finalize`] consumes the session, so the result consumer is
//! structurally invoked at most once and no timer can outlive its session.

use common::SessionEpoch;
use protocol::{DeviceKey, PrinterDescriptor, ScanError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Where the session currently is in its lifecycle
///
/// `Idle` and the terminal states have no representation here: no session
/// exists while idle, and finalization destroys the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    /// Snapshot taken, not yet waiting on any device
    Enumerating,
    /// A permission request is outstanding for the cursor target
    AwaitingPermission,
    /// Permission confirmed, serial read in flight for the cursor target
    ReadingAttribute,
}

/// Aggregate state of one in-progress scan
pub struct ScanSession {
    /// Session identity, checked against incoming events
    epoch: SessionEpoch,
    /// Current lifecycle position
    pub status: ScanStatus,
    /// Full snapshot, enriched in place as serial reads succeed
    snapshot: Vec<PrinterDescriptor>,
    /// Privileged targets in enumeration order, each identity at most once
    queue: Vec<DeviceKey>,
    /// Index of the target currently being processed; always <= queue.len()
    cursor: usize,
    /// Reply channel of the caller that started the scan
    reply: Option<oneshot::Sender<Result<Vec<PrinterDescriptor>, ScanError>>>,
    /// Timer bounding the current target's permission wait
    device_timer: Option<JoinHandle<()>>,
    /// Timer bounding the whole scan
    global_timer: Option<JoinHandle<()>>,
}

impl ScanSession {
    /// Create a session from a fresh snapshot
    ///
    /// The privileged-target queue preserves the collector's enumeration
    /// order and drops duplicate identities.
    pub fn new(
        epoch: SessionEpoch,
        snapshot: Vec<PrinterDescriptor>,
        reply: oneshot::Sender<Result<Vec<PrinterDescriptor>, ScanError>>,
    ) -> Self {
        let mut queue = Vec::new();
        for desc in snapshot.iter().filter(|d| d.privileged) {
            if !queue.contains(&desc.device_id) {
                queue.push(desc.device_id);
            }
        }

        debug!(
            "Scan session {:?}: {} devices, {} privileged targets",
            epoch,
            snapshot.len(),
            queue.len()
        );

        Self {
            epoch,
            status: ScanStatus::Enumerating,
            snapshot,
            queue,
            cursor: 0,
            reply: Some(reply),
            device_timer: None,
            global_timer: None,
        }
    }

    /// Session epoch
    pub fn epoch(&self) -> SessionEpoch {
        self.epoch
    }

    /// The target the cursor points at, or None when the queue is exhausted
    pub fn current_target(&self) -> Option<DeviceKey> {
        self.queue.get(self.cursor).copied()
    }

    /// Move the cursor past the current target
    pub fn advance_cursor(&mut self) {
        if self.cursor < self.queue.len() {
            self.cursor += 1;
        }
    }

    /// Record a successfully read serial number into the snapshot
    pub fn record_serial(&mut self, device: DeviceKey, serial: String) {
        if let Some(desc) = self.snapshot.iter_mut().find(|d| d.device_id == device) {
            desc.serial_number = Some(serial);
        }
    }

    /// Arm the per-device timer, replacing (and disarming) any previous one
    pub fn arm_device_timer(&mut self, timer: JoinHandle<()>) {
        self.disarm_device_timer();
        self.device_timer = Some(timer);
    }

    /// Disarm the per-device timer if armed
    pub fn disarm_device_timer(&mut self) {
        if let Some(timer) = self.device_timer.take() {
            timer.abort();
        }
    }

    /// Arm the global timer
    pub fn arm_global_timer(&mut self, timer: JoinHandle<()>) {
        if let Some(previous) = self.global_timer.replace(timer) {
            previous.abort();
        }
    }

    /// Tear the session down and deliver the accumulated result
    ///
    /// The single finalization path shared by normal completion, cancel, and
    /// global timeout: disarms both timers and resolves the caller with the
    /// snapshot as it stands. Consuming `self` guarantees exactly-once
    /// delivery.
    pub fn finalize(mut self) {
        self.disarm_device_timer();
        if let Some(timer) = self.global_timer.take() {
            timer.abort();
        }

        if let Some(reply) = self.reply.take() {
            info!(
                "Scan session {:?} finished: delivering {} devices ({}/{} targets processed)",
                self.epoch,
                self.snapshot.len(),
                self.cursor,
                self.queue.len()
            );
            let _ = reply.send(Ok(self.snapshot));
        }
    }
}
