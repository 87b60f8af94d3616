//! USB worker thread
//!
//! Dedicated thread for the synchronous rusb operations. Receives commands
//! from the coordinator over the channel bridge, answers request/response
//! commands through their oneshot channels, and emits permission outcomes as
//! out-of-band events. The loop runs until a Shutdown command arrives or the
//! command channel closes.

use crate::usb::collector::PrinterCollector;
use common::{UsbCommand, UsbEvent, UsbWorker};
use protocol::CollectorError;
use tracing::{debug, error, info};

/// USB worker thread state
pub struct UsbWorkerThread {
    collector: PrinterCollector,
    worker: UsbWorker,
}

impl UsbWorkerThread {
    /// Create the worker and its collector
    pub fn new(
        worker: UsbWorker,
        filters: Vec<String>,
        privileged_manufacturers: Vec<String>,
    ) -> Result<Self, CollectorError> {
        let collector = PrinterCollector::new(filters, privileged_manufacturers)?;
        Ok(Self { collector, worker })
    }

    /// Run the command loop
    pub fn run(self) {
        info!("USB worker thread started");

        loop {
            match self.worker.recv_command() {
                Ok(UsbCommand::Shutdown) => {
                    info!("USB worker shutting down");
                    break;
                }
                Ok(cmd) => self.handle_command(cmd),
                Err(_) => {
                    debug!("Command channel closed, USB worker stopping");
                    break;
                }
            }
        }

        info!("USB worker thread stopped");
    }

    /// Handle a command, containing any panic to keep the thread alive
    fn handle_command(&self, cmd: UsbCommand) {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.handle_command_inner(cmd)
        }));

        if let Err(e) = result {
            error!("Panic in USB command handler: {:?}", e);
        }
    }

    fn handle_command_inner(&self, cmd: UsbCommand) {
        match cmd {
            UsbCommand::ListPrinters { response } => {
                let snapshot = self.collector.list_printers();
                let _ = response.send(snapshot);
            }

            UsbCommand::HasPermission { device, response } => {
                let accessible = self.collector.has_access(device);
                debug!("Access probe for device {}: {}", device, accessible);
                let _ = response.send(accessible);
            }

            UsbCommand::RequestPermission { device, epoch } => {
                let granted = self.collector.probe_access(device);
                debug!(
                    "Permission request for device {} resolved: granted={}",
                    device, granted
                );
                if self
                    .worker
                    .send_event(UsbEvent::PermissionResult {
                        device,
                        granted,
                        epoch,
                    })
                    .is_err()
                {
                    error!("Failed to deliver permission result for device {}", device);
                }
            }

            UsbCommand::ReadSerial { device, response } => {
                let result = self.collector.read_serial(device);
                let _ = response.send(result);
            }

            UsbCommand::Shutdown => {
                // Handled in the main loop
                unreachable!()
            }
        }
    }
}

/// Spawn the USB worker thread
///
/// Returns a join handle; the thread exits after a Shutdown command.
pub fn spawn_usb_worker(
    worker: UsbWorker,
    filters: Vec<String>,
    privileged_manufacturers: Vec<String>,
) -> std::thread::JoinHandle<Result<(), CollectorError>> {
    std::thread::Builder::new()
        .name("usb-worker".to_string())
        .spawn(move || {
            let worker_thread = UsbWorkerThread::new(worker, filters, privileged_manufacturers)?;
            worker_thread.run();
            Ok(())
        })
        .expect("Failed to spawn USB worker thread")
}
