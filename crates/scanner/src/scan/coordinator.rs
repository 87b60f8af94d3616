//! Scan coordinator
//!
//! A single tokio task owns the [`ScanSession`] and is the only place that
//! mutates it, which gives the one mutual-exclusion boundary the scan needs.
//! The task is driven by three event sources selected in one loop: caller
//! commands, permission results from the USB thread, and timer expiries.
//! Permission grant, permission deny, and per-device timeout all funnel into
//! the same advance path, and every event is checked against the live
//! session's epoch and cursor target before it may act; a stale event is a
//! no-op.

use crate::scan::session::{ScanSession, ScanStatus};
use common::{SessionEpoch, UsbBridge, UsbCommand, UsbEvent};
use protocol::{CancelStatus, CollectorError, DeviceKey, PrinterDescriptor, ScanError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timer ceilings for one scan
#[derive(Debug, Clone, Copy)]
pub struct ScanTimeouts {
    /// How long to wait for one device's permission decision
    pub per_device: Duration,
    /// How long the whole scan may run
    pub global: Duration,
}

impl Default for ScanTimeouts {
    fn default() -> Self {
        Self {
            per_device: Duration::from_secs(10),
            global: Duration::from_secs(60),
        }
    }
}

/// Caller-facing commands
#[derive(Debug)]
enum ScanCommand {
    Start {
        include_serials: bool,
        reply: oneshot::Sender<Result<Vec<PrinterDescriptor>, ScanError>>,
    },
    Cancel {
        reply: oneshot::Sender<CancelStatus>,
    },
}

/// Expiry notifications from spawned timer tasks
#[derive(Debug, Clone, Copy)]
enum TimerEvent {
    Device {
        device: DeviceKey,
        epoch: SessionEpoch,
    },
    Global {
        epoch: SessionEpoch,
    },
}

/// Cloneable handle to a running coordinator task
#[derive(Clone)]
pub struct ScanHandle {
    cmd_tx: mpsc::Sender<ScanCommand>,
}

impl ScanHandle {
    /// Start a scan and wait for its result
    ///
    /// With `include_serials = false` the full snapshot is returned without
    /// any permission round-trips, timers, or session. Otherwise the call
    /// resolves once every privileged target has been processed, the scan is
    /// cancelled, or the global ceiling fires. In all three cases the result
    /// has one descriptor per attached device, with serial numbers filled in
    /// where a round-trip succeeded.
    pub async fn start_scan(
        &self,
        include_serials: bool,
    ) -> Result<Vec<PrinterDescriptor>, ScanError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ScanCommand::Start {
                include_serials,
                reply,
            })
            .await
            .map_err(|_| ScanError::CoordinatorGone)?;
        rx.await.map_err(|_| ScanError::CoordinatorGone)?
    }

    /// Cancel the active scan, if any
    ///
    /// The scan's own caller still receives the partial result through the
    /// normal completion path; this call only acknowledges the cancellation.
    pub async fn cancel_scan(&self) -> CancelStatus {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(ScanCommand::Cancel { reply })
            .await
            .is_err()
        {
            return CancelStatus::NothingToCancel;
        }
        rx.await.unwrap_or(CancelStatus::NothingToCancel)
    }
}

/// Spawn the coordinator task
pub fn spawn_coordinator(bridge: UsbBridge, timeouts: ScanTimeouts) -> ScanHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (timer_tx, timer_rx) = mpsc::channel(16);

    let coordinator = Coordinator {
        bridge,
        timeouts,
        timer_tx,
        session: None,
        last_epoch: SessionEpoch(0),
    };
    tokio::spawn(coordinator.run(cmd_rx, timer_rx));

    ScanHandle { cmd_tx }
}

struct Coordinator {
    bridge: UsbBridge,
    timeouts: ScanTimeouts,
    timer_tx: mpsc::Sender<TimerEvent>,
    session: Option<ScanSession>,
    last_epoch: SessionEpoch,
}

impl Coordinator {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<ScanCommand>,
        mut timer_rx: mpsc::Receiver<TimerEvent>,
    ) {
        // Separate clone so the select arms don't hold a borrow of self
        let events = self.bridge.clone();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(ScanCommand::Start { include_serials, reply }) => {
                        self.handle_start(include_serials, reply).await;
                    }
                    Some(ScanCommand::Cancel { reply }) => {
                        self.handle_cancel(reply);
                    }
                    None => break,
                },
                event = events.recv_event() => match event {
                    Ok(UsbEvent::PermissionResult { device, granted, epoch }) => {
                        self.handle_permission_result(device, granted, epoch).await;
                    }
                    Err(_) => {
                        debug!("USB event channel closed, coordinator stopping");
                        break;
                    }
                },
                timer = timer_rx.recv() => match timer {
                    Some(TimerEvent::Device { device, epoch }) => {
                        self.handle_device_timeout(device, epoch).await;
                    }
                    Some(TimerEvent::Global { epoch }) => {
                        self.handle_global_timeout(epoch);
                    }
                    // Coordinator holds a sender, so this channel never closes
                    None => break,
                },
            }
        }

        // Deliver whatever was accumulated if we stop mid-scan
        if let Some(session) = self.session.take() {
            session.finalize();
        }
    }

    /// Accept or reject a scan request
    async fn handle_start(
        &mut self,
        include_serials: bool,
        reply: oneshot::Sender<Result<Vec<PrinterDescriptor>, ScanError>>,
    ) {
        if self.session.is_some() {
            debug!("Rejecting scan request: another scan is in progress");
            let _ = reply.send(Err(ScanError::ScanInProgress));
            return;
        }

        let snapshot = match self.list_printers().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        if !include_serials {
            debug!("Plain scan: returning {} devices directly", snapshot.len());
            let _ = reply.send(Ok(snapshot));
            return;
        }

        self.last_epoch = self.last_epoch.next();
        let epoch = self.last_epoch;
        let mut session = ScanSession::new(epoch, snapshot, reply);
        session.arm_global_timer(self.spawn_global_timer(epoch));
        self.session = Some(session);

        self.advance().await;
    }

    /// Acknowledge a cancel request and finalize the active session
    fn handle_cancel(&mut self, reply: oneshot::Sender<CancelStatus>) {
        match self.session.take() {
            Some(session) => {
                info!("Scan session {:?} cancelled", session.epoch());
                session.finalize();
                let _ = reply.send(CancelStatus::Cancelled);
            }
            None => {
                let _ = reply.send(CancelStatus::NothingToCancel);
            }
        }
    }

    /// Process targets from the cursor onward until the scan suspends or ends
    ///
    /// Suspends only when a permission request had to be issued; targets
    /// whose permission is already granted are handled inline.
    async fn advance(&mut self) {
        loop {
            let (target, epoch) = match &self.session {
                Some(session) => (session.current_target(), session.epoch()),
                None => return,
            };

            let Some(device) = target else {
                if let Some(session) = self.session.take() {
                    session.finalize();
                }
                return;
            };

            if self.has_permission(device).await {
                debug!("Permission already granted for device {}", device);
                self.read_serial_into_session(device).await;
                if let Some(session) = self.session.as_mut() {
                    session.advance_cursor();
                }
                continue;
            }

            debug!("Requesting permission for device {}", device);
            if let Some(session) = self.session.as_mut() {
                session.status = ScanStatus::AwaitingPermission;
            }
            let request = UsbCommand::RequestPermission { device, epoch };
            if self.bridge.send_command(request).await.is_err() {
                warn!("USB worker unavailable, skipping device {}", device);
                if let Some(session) = self.session.as_mut() {
                    session.advance_cursor();
                }
                continue;
            }
            let timer = self.spawn_device_timer(device, epoch);
            match self.session.as_mut() {
                Some(session) => session.arm_device_timer(timer),
                None => timer.abort(),
            }
            return;
        }
    }

    /// Grant/deny funnel entry
    async fn handle_permission_result(
        &mut self,
        device: DeviceKey,
        granted: bool,
        epoch: SessionEpoch,
    ) {
        if !self.event_is_current(device, epoch) {
            debug!("Ignoring stale permission result for device {}", device);
            return;
        }

        if let Some(session) = self.session.as_mut() {
            session.disarm_device_timer();
        }

        if granted {
            self.read_serial_into_session(device).await;
        } else {
            info!("Permission denied for device {}, continuing without serial", device);
        }

        if let Some(session) = self.session.as_mut() {
            session.advance_cursor();
        }
        self.advance().await;
    }

    /// Per-device timeout funnel entry, equivalent to a deny
    async fn handle_device_timeout(&mut self, device: DeviceKey, epoch: SessionEpoch) {
        if !self.event_is_current(device, epoch) {
            debug!("Ignoring stale per-device timer for device {}", device);
            return;
        }

        warn!("Permission wait timed out for device {}", device);
        if let Some(session) = self.session.as_mut() {
            session.disarm_device_timer();
            session.advance_cursor();
        }
        self.advance().await;
    }

    /// Global ceiling: finalize immediately with whatever has been collected
    fn handle_global_timeout(&mut self, epoch: SessionEpoch) {
        let current = self.session.as_ref().map(ScanSession::epoch);
        if current != Some(epoch) {
            debug!("Ignoring stale global timer for {:?}", epoch);
            return;
        }

        if let Some(session) = self.session.take() {
            warn!(
                "Global scan ceiling reached, finalizing session {:?} with partial results",
                epoch
            );
            session.finalize();
        }
    }

    /// An event may act only if it refers to the live session and its
    /// current cursor target while a permission wait is outstanding.
    fn event_is_current(&self, device: DeviceKey, epoch: SessionEpoch) -> bool {
        match &self.session {
            Some(session) => {
                session.epoch() == epoch
                    && session.status == ScanStatus::AwaitingPermission
                    && session.current_target() == Some(device)
            }
            None => false,
        }
    }

    async fn list_printers(&self) -> Result<Vec<PrinterDescriptor>, ScanError> {
        let worker_gone = || ScanError::Collector(CollectorError::new("USB worker unavailable"));

        let (tx, rx) = oneshot::channel();
        self.bridge
            .send_command(UsbCommand::ListPrinters { response: tx })
            .await
            .map_err(|_| worker_gone())?;
        let snapshot = rx
            .await
            .map_err(|_| worker_gone())?
            .map_err(ScanError::Collector)?;
        info!(
            "Enumerated {} devices ({} privileged)",
            snapshot.len(),
            snapshot.iter().filter(|d| d.privileged).count()
        );
        Ok(snapshot)
    }

    async fn has_permission(&self, device: DeviceKey) -> bool {
        let (tx, rx) = oneshot::channel();
        let sent = self
            .bridge
            .send_command(UsbCommand::HasPermission {
                device,
                response: tx,
            })
            .await;
        if sent.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Read the serial number of a confirmed target into the session
    ///
    /// A failed read is absorbed: the cause is logged and the device keeps an
    /// absent serial number.
    async fn read_serial_into_session(&mut self, device: DeviceKey) {
        if let Some(session) = self.session.as_mut() {
            session.status = ScanStatus::ReadingAttribute;
        }

        let (tx, rx) = oneshot::channel();
        let sent = self
            .bridge
            .send_command(UsbCommand::ReadSerial {
                device,
                response: tx,
            })
            .await;
        if sent.is_err() {
            warn!("USB worker unavailable for serial read of device {}", device);
            return;
        }

        match rx.await {
            Ok(Ok(serial)) => {
                debug!("Serial number for device {}: {}", device, serial);
                if let Some(session) = self.session.as_mut() {
                    session.record_serial(device, serial);
                }
            }
            Ok(Err(e)) => {
                warn!("Serial read failed for device {}: {}", device, e);
            }
            Err(_) => {
                warn!("Serial read response dropped for device {}", device);
            }
        }
    }

    fn spawn_device_timer(&self, device: DeviceKey, epoch: SessionEpoch) -> JoinHandle<()> {
        let timer_tx = self.timer_tx.clone();
        let delay = self.timeouts.per_device;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(TimerEvent::Device { device, epoch }).await;
        })
    }

    fn spawn_global_timer(&self, epoch: SessionEpoch) -> JoinHandle<()> {
        let timer_tx = self.timer_tx.clone();
        let delay = self.timeouts.global;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = timer_tx.send(TimerEvent::Global { epoch }).await;
        })
    }
}
