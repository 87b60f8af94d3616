//! Async channel bridge between the tokio runtime and the USB thread
//!
//! Commands flow from the scan coordinator to the blocking USB worker;
//! permission outcomes flow back as out-of-band events rather than command
//! responses, because the host may decide them long after the request was
//! issued. Events carry the epoch of the session that requested them so the
//! coordinator can discard results that arrive after a cancel or reset.

use async_channel::{Receiver, Sender, bounded};
use protocol::{CollectorError, DeviceKey, PrinterDescriptor, ReadError};

/// Monotonic scan-session counter
///
/// A new epoch is minted for every session. Permission and timer events are
/// tagged with the epoch that armed them; an event whose epoch does not match
/// the live session is stale and must be ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionEpoch(pub u64);

impl SessionEpoch {
    /// Epoch of the next session
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

/// Commands from the coordinator to the USB thread
#[derive(Debug)]
pub enum UsbCommand {
    /// Enumerate all attached printers
    ListPrinters {
        /// Channel to send the snapshot back
        response:
            tokio::sync::oneshot::Sender<Result<Vec<PrinterDescriptor>, CollectorError>>,
    },

    /// Check whether the protected attribute of a device is already readable
    HasPermission {
        /// Device to probe
        device: DeviceKey,
        /// Channel to send the probe result back
        response: tokio::sync::oneshot::Sender<bool>,
    },

    /// Request authorization to read a device's protected attribute
    ///
    /// Fire-and-forget: the outcome arrives later as
    /// [`UsbEvent::PermissionResult`] on the event channel.
    RequestPermission {
        /// Device the authorization is for
        device: DeviceKey,
        /// Session that issued the request, echoed back in the event
        epoch: SessionEpoch,
    },

    /// Read the serial number of a device whose permission is confirmed
    ReadSerial {
        /// Device to read from
        device: DeviceKey,
        /// Channel to send the read result back
        response: tokio::sync::oneshot::Sender<Result<String, ReadError>>,
    },

    /// Shutdown the USB thread gracefully
    Shutdown,
}

/// Events from the USB thread to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsbEvent {
    /// Asynchronous outcome of a [`UsbCommand::RequestPermission`]
    PermissionResult {
        /// Device the decision is for
        device: DeviceKey,
        /// Whether authorization was granted
        granted: bool,
        /// Epoch echoed from the originating request
        epoch: SessionEpoch,
    },
}

/// Handle for the tokio runtime (async)
#[derive(Clone)]
pub struct UsbBridge {
    cmd_tx: Sender<UsbCommand>,
    event_rx: Receiver<UsbEvent>,
}

impl UsbBridge {
    /// Send a command to the USB thread
    pub async fn send_command(&self, cmd: UsbCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB thread
    pub async fn recv_event(&self) -> crate::Result<UsbEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for the USB thread (blocking) and for mock workers in tests
pub struct UsbWorker {
    cmd_rx: Receiver<UsbCommand>,
    event_tx: Sender<UsbEvent>,
}

impl UsbWorker {
    /// Receive a command from the coordinator (blocking)
    pub fn recv_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<UsbCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Receive a command from an async context (mock workers)
    pub async fn next_command(&self) -> crate::Result<UsbCommand> {
        self.cmd_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event to the coordinator (blocking)
    pub fn send_event(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .send_blocking(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Send an event from an async context (mock workers)
    pub async fn send_event_async(&self, event: UsbEvent) -> crate::Result<()> {
        self.event_tx
            .send(event)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between the coordinator and the USB thread
///
/// Returns (UsbBridge for tokio, UsbWorker for the USB thread)
pub fn create_usb_bridge() -> (UsbBridge, UsbWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(64);

    (
        UsbBridge { cmd_tx, event_rx },
        UsbWorker { cmd_rx, event_tx },
    )
}
