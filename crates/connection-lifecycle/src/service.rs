//! Running the coordinator and talking to it from other contexts.

use crate::coordinator::ConnectionCoordinator;
use crate::event::{AccessPoint, Event, EventReceiver, EventSender};
use crate::{LifecycleError, LifecycleResult};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Starts the adbd transport reader. Called at most once, on the
/// coordinator's worker.
pub type ReaderLauncher = Box<dyn FnOnce() + Send>;

/// Typed requests into the coordinator queue.
///
/// Requests are applied asynchronously in the order they were sent. A
/// request fails only when the coordinator has stopped.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    events: EventSender,
}

impl CoordinatorHandle {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    pub fn set_usb_enabled(&self, enabled: bool) -> LifecycleResult<()> {
        self.post(if enabled {
            Event::UsbDebuggingEnabled
        } else {
            Event::UsbDebuggingDisabled
        })
    }

    pub fn set_wifi_enabled(&self, enabled: bool) -> LifecycleResult<()> {
        self.post(if enabled {
            Event::WifiDebuggingEnabled
        } else {
            Event::WifiDebuggingDisabled
        })
    }

    pub fn allow_debugging(&self, always: bool, public_key: &str) -> LifecycleResult<()> {
        self.post(Event::AllowKey {
            key: public_key.to_string(),
            always,
        })
    }

    pub fn deny_debugging(&self) -> LifecycleResult<()> {
        self.post(Event::DenyKey)
    }

    pub fn clear_debugging_keys(&self) -> LifecycleResult<()> {
        self.post(Event::ClearAuthorizations)
    }

    pub fn allow_wireless_debugging(&self, always: bool, bssid: &str) -> LifecycleResult<()> {
        self.post(Event::AllowNetwork {
            bssid: bssid.to_string(),
            always,
        })
    }

    pub fn deny_wireless_debugging(&self) -> LifecycleResult<()> {
        self.post(Event::DenyNetwork)
    }

    pub fn unpair_device(&self, fingerprint: &str) -> LifecycleResult<()> {
        self.post(Event::UnpairDevice {
            fingerprint: fingerprint.to_string(),
        })
    }

    pub fn enable_pairing_by_code(&self) -> LifecycleResult<()> {
        self.post(Event::StartPairingWithCode)
    }

    pub fn enable_pairing_by_qr(&self, service_name: &str, password: &str) -> LifecycleResult<()> {
        self.post(Event::StartPairingWithQr {
            service_name: service_name.to_string(),
            password: password.to_string(),
        })
    }

    pub fn disable_pairing(&self) -> LifecycleResult<()> {
        self.post(Event::CancelPairing)
    }

    /// Pairing service callbacks.
    pub fn pairing_port_opened(&self, port: u16) -> LifecycleResult<()> {
        self.post(Event::PairingPortOpened { port })
    }

    pub fn pairing_completed(&self, public_key: Option<String>) -> LifecycleResult<()> {
        self.post(Event::PairingCompleted { key: public_key })
    }

    /// The key files were modified outside the daemon.
    pub fn notify_key_files_updated(&self) -> LifecycleResult<()> {
        self.post(Event::KeyFilesUpdated)
    }

    pub fn notify_allowed_window_changed(&self) -> LifecycleResult<()> {
        self.post(Event::AllowedWindowChanged)
    }

    pub fn network_changed(&self, access_point: Option<AccessPoint>) -> LifecycleResult<()> {
        self.post(Event::NetworkChanged { access_point })
    }

    /// Flush pending writes and stop the worker.
    pub fn shutdown(&self) -> LifecycleResult<()> {
        self.post(Event::Shutdown)
    }

    pub fn post(&self, event: Event) -> LifecycleResult<()> {
        self.events
            .send(event)
            .map_err(|_| LifecycleError::QueueClosed)
    }
}

impl ConnectionCoordinator {
    pub fn handle(&self) -> CoordinatorHandle {
        CoordinatorHandle::new(self.events().clone())
    }

    /// Drain `events` on a blocking worker until [`Event::Shutdown`].
    ///
    /// The worker may block on adbd restarts, so it stays off the async
    /// executor. The coordinator is handed back when the worker stops.
    pub fn spawn(mut self, runtime: &Handle, mut events: EventReceiver) -> JoinHandle<Self> {
        runtime.spawn_blocking(move || {
            info!("Connection coordinator started");
            while let Some(event) = events.blocking_recv() {
                debug!(event = event_name(&event), "Handling event");
                let stop = matches!(event, Event::Shutdown);
                self.handle_event(event);
                if stop {
                    break;
                }
            }
            info!("Connection coordinator stopped");
            self
        })
    }
}

/// Event label without payload, so keys never reach the log.
fn event_name(event: &Event) -> &'static str {
    match event {
        Event::UsbDebuggingEnabled => "usb_enabled",
        Event::UsbDebuggingDisabled => "usb_disabled",
        Event::WifiDebuggingEnabled => "wifi_enabled",
        Event::WifiDebuggingDisabled => "wifi_disabled",
        Event::AllowedWindowChanged => "window_changed",
        Event::KeyPresented { .. } => "key_presented",
        Event::KeyConnected { .. } => "key_connected",
        Event::KeyDisconnected { .. } => "key_disconnected",
        Event::TlsPortAnnounced { .. } => "tls_port",
        Event::TransportLinkUp => "link_up",
        Event::TransportLinkDown => "link_down",
        Event::AllowKey { .. } => "allow_key",
        Event::DenyKey => "deny_key",
        Event::AllowNetwork { .. } => "allow_network",
        Event::DenyNetwork => "deny_network",
        Event::ClearAuthorizations => "clear",
        Event::UnpairDevice { .. } => "unpair",
        Event::StartPairingWithCode => "pair_code",
        Event::StartPairingWithQr { .. } => "pair_qr",
        Event::CancelPairing => "pair_cancel",
        Event::PairingPortOpened { .. } => "pairing_port",
        Event::PairingCompleted { .. } => "pairing_completed",
        Event::NetworkChanged { .. } => "network_changed",
        Event::ExpirationSweepDue => "sweep_due",
        Event::PairingTimedOut { .. } => "pairing_timeout",
        Event::PersistLedger => "persist",
        Event::KeyFilesUpdated => "key_files_updated",
        Event::Shutdown => "shutdown",
    }
}
