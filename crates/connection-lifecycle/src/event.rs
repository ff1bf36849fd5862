//! Inputs to the coordinator.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<Event>;
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

/// Link a host session arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Usb,
    Wifi,
}

/// The Wi-Fi access point the device is associated with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub bssid: String,
    pub ssid: String,
}

impl AccessPoint {
    pub fn new(bssid: impl Into<String>, ssid: impl Into<String>) -> Self {
        Self {
            bssid: bssid.into(),
            ssid: ssid.into(),
        }
    }
}

/// Logical reports decoded from the adbd control socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A host presented an unknown key and waits for a decision.
    KeyPresented { key: String },
    /// A host connected with a key adbd already trusts.
    KeyConnected { key: String, transport: TransportKind },
    KeyDisconnected { key: String, transport: TransportKind },
    /// adbd's TLS server port. `0` means the server went away.
    TlsPortAnnounced { port: u16 },
}

/// Everything the coordinator reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // Settings
    UsbDebuggingEnabled,
    UsbDebuggingDisabled,
    WifiDebuggingEnabled,
    WifiDebuggingDisabled,
    AllowedWindowChanged,

    // Transport
    KeyPresented { key: String },
    KeyConnected { key: String, transport: TransportKind },
    KeyDisconnected { key: String, transport: TransportKind },
    TlsPortAnnounced { port: u16 },
    TransportLinkUp,
    TransportLinkDown,

    // UI
    AllowKey { key: String, always: bool },
    DenyKey,
    AllowNetwork { bssid: String, always: bool },
    DenyNetwork,
    ClearAuthorizations,
    UnpairDevice { fingerprint: String },
    StartPairingWithCode,
    StartPairingWithQr { service_name: String, password: String },
    CancelPairing,

    // Pairing service
    PairingPortOpened { port: u16 },
    PairingCompleted { key: Option<String> },

    // Network monitor
    NetworkChanged { access_point: Option<AccessPoint> },

    // Timers and internal
    ExpirationSweepDue,
    PairingTimedOut { session_id: u64 },
    PersistLedger,
    KeyFilesUpdated,
    /// Drain stops after this event.
    Shutdown,
}

impl From<TransportEvent> for Event {
    fn from(event: TransportEvent) -> Self {
        match event {
            TransportEvent::KeyPresented { key } => Event::KeyPresented { key },
            TransportEvent::KeyConnected { key, transport } => {
                Event::KeyConnected { key, transport }
            }
            TransportEvent::KeyDisconnected { key, transport } => {
                Event::KeyDisconnected { key, transport }
            }
            TransportEvent::TlsPortAnnounced { port } => Event::TlsPortAnnounced { port },
        }
    }
}
