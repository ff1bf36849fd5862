//! Seams to the world outside the coordinator.
//!
//! Every collaborator is called from the coordinator's single worker, so
//! implementations must return promptly. Only [`DaemonService`] may block,
//! and only up to the timeout it is given.

use crate::event::AccessPoint;
use crate::scheduler::Scheduler;
use crate::LifecycleResult;
use adbauth_config_and_utils::{Clock, SettingsProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Replies and instructions for adbd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCommand {
    Allow,
    Deny,
    /// Drop any live session authenticated with this key.
    DisconnectDevice(String),
    StartWifi,
    StopWifi,
}

impl TransportCommand {
    /// Wire form understood by adbd.
    pub fn wire(&self) -> String {
        match self {
            TransportCommand::Allow => "OK".to_string(),
            TransportCommand::Deny => "NO".to_string(),
            TransportCommand::DisconnectDevice(key) => format!("DD{key}"),
            TransportCommand::StartWifi => "W1".to_string(),
            TransportCommand::StopWifi => "W0".to_string(),
        }
    }
}

pub trait TransportSink: Send + Sync {
    fn send(&self, command: TransportCommand);
}

/// A paired host as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedDevice {
    /// `user@host` label from the key.
    pub name: String,
    /// Key fingerprint.
    pub guid: String,
    /// Currently connected over Wi-Fi.
    pub connected: bool,
}

impl PairedDevice {
    pub fn from_key(key: &str, connected: bool) -> Self {
        Self {
            name: key_fingerprint::hostname_label(key).to_string(),
            guid: key_fingerprint::fingerprint(key),
            connected,
        }
    }
}

/// User-facing prompts and status. Every method defaults to doing nothing.
pub trait UiNotifier: Send + Sync {
    fn confirm_key(&self, _key: &str, _fingerprint: &str) {}

    fn confirm_network(&self, _ssid: &str, _bssid: &str) {}

    fn paired_devices(&self, _devices: &[PairedDevice]) {}

    fn pairing_code(&self, _code: &str) {}

    fn pairing_port(&self, _port: u16) {}

    fn pairing_succeeded(&self, _device: &PairedDevice) {}

    fn pairing_failed(&self) {}

    /// Wireless debugging server state. `port` is `-1` when unknown.
    fn connection_state(&self, _connected: bool, _port: i32) {}

    fn connected_notification(&self, _show: bool) {}

    /// adbd did not come back after revoking grants; USB debugging was turned off.
    fn daemon_restart_failed(&self) {}
}

pub trait NetworkInfo: Send + Sync {
    /// The access point currently associated, if any.
    fn current_access_point(&self) -> Option<AccessPoint>;
}

/// Persistent user toggles for the two debugging transports.
pub trait DebugToggles: Send + Sync {
    fn set_usb_debugging_enabled(&self, enabled: bool);

    fn set_wifi_debugging_enabled(&self, enabled: bool);
}

/// Control over the adbd service itself.
pub trait DaemonService: Send + Sync {
    /// Stop adbd and wait until it has stopped.
    fn stop(&self, timeout: Duration) -> LifecycleResult<()>;

    /// Start adbd and wait until it is running.
    fn start(&self, timeout: Duration) -> LifecycleResult<()>;
}

/// Discovery advertisement for the pairing handshake.
///
/// Results come back as [`Event::PairingPortOpened`](crate::Event::PairingPortOpened)
/// and [`Event::PairingCompleted`](crate::Event::PairingCompleted).
pub trait PairingService: Send + Sync {
    fn start_advertising(&self, secret: &str, service_label: Option<&str>);

    fn stop_advertising(&self);
}

/// Watches for adbd's TLS port while wireless debugging is on.
pub trait PortDiscovery: Send + Sync {
    fn start(&self);

    fn stop(&self);
}

/// Everything the coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn TransportSink>,
    pub ui: Arc<dyn UiNotifier>,
    pub network: Arc<dyn NetworkInfo>,
    pub toggles: Arc<dyn DebugToggles>,
    pub daemon: Arc<dyn DaemonService>,
    pub pairing: Arc<dyn PairingService>,
    pub port_discovery: Arc<dyn PortDiscovery>,
    pub scheduler: Arc<dyn Scheduler>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<dyn SettingsProvider>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_adbd_wire_format() {
        assert_eq!(TransportCommand::Allow.wire(), "OK");
        assert_eq!(TransportCommand::Deny.wire(), "NO");
        assert_eq!(TransportCommand::StartWifi.wire(), "W1");
        assert_eq!(TransportCommand::StopWifi.wire(), "W0");
        assert_eq!(
            TransportCommand::DisconnectDevice("AAAA user@host".to_string()).wire(),
            "DDAAAA user@host"
        );
    }

    #[test]
    fn paired_device_from_key() {
        let device = PairedDevice::from_key("aGVsbG8= alice@laptop", true);
        assert_eq!(device.name, "alice@laptop");
        assert_eq!(device.guid, key_fingerprint::fingerprint("aGVsbG8="));
        assert!(device.connected);

        let anonymous = PairedDevice::from_key("aGVsbG8=", false);
        assert_eq!(anonymous.name, key_fingerprint::DEFAULT_HOSTNAME_LABEL);
    }
}
