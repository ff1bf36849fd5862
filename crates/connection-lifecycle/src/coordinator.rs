//! The connection coordinator.
//!
//! # Ownership
//!
//! The coordinator owns the [`AuthorizationLedger`], the per-key connection
//! refcounts and the write side of the Wi-Fi connected set. Nothing else
//! mutates them. Every change arrives as an [`Event`] and is applied by
//! [`ConnectionCoordinator::handle_event`], one at a time, in queue order.
//!
//! # Persistence
//!
//! Mutations request a persist through [`PersistSignal`], which queues a
//! single [`Event::PersistLedger`] no matter how many requests pile up.
//! Disk writes therefore happen on the same worker, after the mutation.

use crate::collaborators::{Collaborators, PairedDevice, TransportCommand};
use crate::event::{AccessPoint, Event, EventSender, TransportKind};
use crate::network_monitor::WifiNetworkMonitor;
use crate::pairing::{generate_pairing_code, PairingMachineInput, PairingSession};
use crate::persist_signal::PersistSignal;
use crate::scheduler::{expiration_delay, TimerJob, TimerSlot};
use crate::service::ReaderLauncher;
use crate::wifi_keys::{WifiConnectedKeys, WifiConnectedKeysWriter};
use crate::LifecycleResult;
use adbauth_config_and_utils::{
    Config, DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS, DEFAULT_PAIRING_TIMEOUT_MS,
};
use adbauth_ledger::{AuthorizationLedger, LedgerStores, PersistRequester};
use key_fingerprint::fingerprint;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Port reported to the UI when the TLS server port is not known.
const UNKNOWN_PORT: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorOptions {
    /// Upper bound for each of adbd's stop and start when cycling it.
    pub daemon_state_change_timeout: Duration,
    /// How long a pairing advertisement may stay up without a result.
    pub pairing_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            daemon_state_change_timeout: Duration::from_millis(
                DEFAULT_DAEMON_STATE_CHANGE_TIMEOUT_MS,
            ),
            pairing_timeout: Duration::from_millis(DEFAULT_PAIRING_TIMEOUT_MS),
        }
    }
}

impl CoordinatorOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            daemon_state_change_timeout: Duration::from_millis(
                config.daemon_state_change_timeout_ms,
            ),
            pairing_timeout: Duration::from_millis(config.pairing_timeout_ms),
        }
    }
}

/// The access point wireless debugging is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub bssid: String,
    pub ssid: String,
    /// TLS server port, `-1` until adbd announces one.
    pub port: i32,
}

impl ConnectionInfo {
    fn bind(access_point: AccessPoint) -> Self {
        Self {
            bssid: access_point.bssid,
            ssid: access_point.ssid,
            port: UNKNOWN_PORT,
        }
    }
}

/// Point-in-time view for status dumps. Keys appear only as fingerprints.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub usb_enabled: bool,
    pub wifi_enabled: bool,
    pub transport_link_up: bool,
    pub pairing_active: bool,
    pub connection_info: Option<ConnectionInfo>,
    /// Fingerprint to live session count.
    pub connected_keys: BTreeMap<String, u32>,
    pub wifi_connected: Vec<String>,
    pub grants: usize,
    pub trusted_networks: usize,
    pub next_expiration_ms: i64,
}

pub struct ConnectionCoordinator {
    ledger: AuthorizationLedger,
    persist: Arc<PersistSignal>,
    collaborators: Collaborators,
    options: CoordinatorOptions,
    events: EventSender,

    reader_launcher: Option<ReaderLauncher>,
    reader_started: bool,
    transport_link_up: bool,

    usb_enabled: bool,
    wifi_enabled: bool,
    connection_info: Option<ConnectionInfo>,
    network_monitor: Arc<WifiNetworkMonitor>,

    /// Fingerprint of the key awaiting a user decision.
    pending_fingerprint: Option<String>,
    connected_keys: HashMap<String, u32>,
    wifi_keys: WifiConnectedKeysWriter,

    pairing: PairingSession,
}

impl ConnectionCoordinator {
    /// Open the ledger and build a coordinator that posts its own follow-up
    /// events (persist, timers) to `events`.
    pub fn new(
        stores: LedgerStores,
        collaborators: Collaborators,
        options: CoordinatorOptions,
        events: EventSender,
    ) -> Self {
        let persist = Arc::new(PersistSignal::new(events.clone()));
        let ledger = AuthorizationLedger::open(
            stores,
            collaborators.clock.clone(),
            collaborators.settings.clone(),
            persist.clone(),
        );

        Self {
            ledger,
            persist,
            collaborators,
            options,
            events: events.clone(),
            reader_launcher: None,
            reader_started: false,
            transport_link_up: false,
            usb_enabled: false,
            wifi_enabled: false,
            connection_info: None,
            network_monitor: Arc::new(WifiNetworkMonitor::new(events.clone())),
            pending_fingerprint: None,
            connected_keys: HashMap::new(),
            wifi_keys: WifiConnectedKeysWriter::new(),
            pairing: PairingSession::new(),
        }
    }

    /// Run `launcher` the first time a transport needs the adbd reader.
    pub fn with_reader_launcher(mut self, launcher: ReaderLauncher) -> Self {
        self.reader_launcher = Some(launcher);
        self
    }

    pub(crate) fn events(&self) -> &EventSender {
        &self.events
    }

    // ========================================================================
    // Read access
    // ========================================================================

    pub fn ledger(&self) -> &AuthorizationLedger {
        &self.ledger
    }

    pub fn wifi_connected_keys(&self) -> WifiConnectedKeys {
        self.wifi_keys.reader()
    }

    pub fn is_usb_enabled(&self) -> bool {
        self.usb_enabled
    }

    pub fn is_wifi_enabled(&self) -> bool {
        self.wifi_enabled
    }

    pub fn connection_info(&self) -> Option<&ConnectionInfo> {
        self.connection_info.as_ref()
    }

    /// Monitor the platform's Wi-Fi callbacks feed. Registered only while
    /// wireless debugging is on.
    pub fn network_monitor(&self) -> Arc<WifiNetworkMonitor> {
        self.network_monitor.clone()
    }

    /// Live session count for `key`, `0` when not connected.
    pub fn connection_count(&self, key: &str) -> u32 {
        self.connected_keys.get(key).copied().unwrap_or(0)
    }

    pub fn is_pairing_active(&self) -> bool {
        self.pairing.is_active()
    }

    /// Every granted key, flagged when it is connected over Wi-Fi.
    pub fn paired_devices(&self) -> Vec<PairedDevice> {
        self.ledger
            .keys()
            .map(|key| PairedDevice::from_key(key, self.wifi_keys.contains(key)))
            .collect()
    }

    pub fn status(&self) -> CoordinatorStatus {
        let wifi_connected = self
            .wifi_keys
            .reader()
            .snapshot()
            .iter()
            .map(|key| fingerprint(key))
            .collect();

        CoordinatorStatus {
            usb_enabled: self.usb_enabled,
            wifi_enabled: self.wifi_enabled,
            transport_link_up: self.transport_link_up,
            pairing_active: self.pairing.is_active(),
            connection_info: self.connection_info.clone(),
            connected_keys: self
                .connected_keys
                .iter()
                .map(|(key, count)| (fingerprint(key), *count))
                .collect(),
            wifi_connected,
            grants: self.ledger.entries().grants.len(),
            trusted_networks: self.ledger.entries().trusted_networks.len(),
            next_expiration_ms: self.ledger.next_expiration_time(),
        }
    }

    // ========================================================================
    // Event dispatch
    // ========================================================================

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::UsbDebuggingEnabled => self.on_usb_enabled(),
            Event::UsbDebuggingDisabled => self.on_usb_disabled(),
            Event::WifiDebuggingEnabled => self.on_wifi_enabled(),
            Event::WifiDebuggingDisabled => self.disable_wifi(),
            Event::AllowedWindowChanged => self.reschedule_expiration(),

            Event::KeyPresented { key } => self.on_key_presented(&key),
            Event::KeyConnected { key, transport } => self.on_key_connected(&key, transport),
            Event::KeyDisconnected { key, transport } => {
                self.on_key_disconnected(&key, transport)
            }
            Event::TlsPortAnnounced { port } => self.on_tls_port(port),
            Event::TransportLinkUp => self.on_link_up(),
            Event::TransportLinkDown => self.on_link_down(),

            Event::AllowKey { key, always } => self.on_allow_key(&key, always),
            Event::DenyKey => {
                warn!("Denying adb confirmation");
                self.pending_fingerprint = None;
                self.send(TransportCommand::Deny);
            }
            Event::AllowNetwork { bssid, always } => self.on_allow_network(&bssid, always),
            Event::DenyNetwork => {
                self.collaborators.toggles.set_wifi_debugging_enabled(false);
                self.collaborators
                    .ui
                    .connection_state(false, UNKNOWN_PORT);
            }
            Event::ClearAuthorizations => self.on_clear_authorizations(),
            Event::UnpairDevice { fingerprint } => self.on_unpair(&fingerprint),
            Event::StartPairingWithCode => {
                if let Err(e) = self.start_pairing(generate_pairing_code(), None) {
                    error!(error = %e, "Pairing request rejected");
                }
            }
            Event::StartPairingWithQr {
                service_name,
                password,
            } => {
                if let Err(e) = self.start_pairing(password, Some(service_name)) {
                    error!(error = %e, "Pairing request rejected");
                }
            }
            Event::CancelPairing => self.on_cancel_pairing(),

            Event::PairingPortOpened { port } => {
                if self.pairing.is_active() {
                    self.collaborators.ui.pairing_port(port);
                }
            }
            Event::PairingCompleted { key } => self.on_pairing_completed(key),

            Event::NetworkChanged { access_point } => self.on_network_changed(access_point),

            Event::ExpirationSweepDue => self.on_sweep_due(),
            Event::PairingTimedOut { session_id } => self.on_pairing_timed_out(session_id),
            Event::PersistLedger => {
                self.persist.acknowledge();
                self.ledger.persist();
            }
            Event::KeyFilesUpdated => self.ledger.reload_from_disk(),
            Event::Shutdown => {
                if self.persist.is_pending() {
                    self.persist.acknowledge();
                    self.ledger.persist();
                }
            }
        }
    }

    // ========================================================================
    // USB debugging
    // ========================================================================

    fn on_usb_enabled(&mut self) {
        if self.usb_enabled {
            return;
        }
        self.ensure_reader_running();
        self.usb_enabled = true;
        info!("USB debugging enabled");
    }

    fn on_usb_disabled(&mut self) {
        if !self.usb_enabled {
            return;
        }
        self.usb_enabled = false;
        info!("USB debugging disabled");
    }

    /// The reader starts once and then lives for the coordinator's lifetime.
    fn ensure_reader_running(&mut self) {
        if self.reader_started {
            return;
        }
        self.reader_started = true;
        if let Some(launch) = self.reader_launcher.take() {
            launch();
        }
        self.ledger.update();
        self.reschedule_expiration();
    }

    // ========================================================================
    // Key decisions
    // ========================================================================

    fn on_key_presented(&mut self, key: &str) {
        let fp = fingerprint(key);
        if fp.is_empty() {
            warn!("Presented key has no valid fingerprint, denying");
            self.send(TransportCommand::Deny);
            return;
        }
        info!(key_fingerprint = %fp, "Awaiting user approval");
        self.collaborators.ui.confirm_key(key, &fp);
        self.pending_fingerprint = Some(fp);
    }

    fn on_allow_key(&mut self, key: &str, always: bool) {
        let fp = fingerprint(key);
        if self.pending_fingerprint.as_deref() != Some(fp.as_str()) {
            error!(
                key_fingerprint = %fp,
                expected = ?self.pending_fingerprint,
                "Fingerprints do not match"
            );
            return;
        }
        self.pending_fingerprint = None;

        self.send(TransportCommand::Allow);
        info!(key_fingerprint = %fp, always, "Key allowed");
        if always {
            self.connected_keys.entry(key.to_string()).or_insert(1);
            self.stamp(key);
        }
    }

    fn on_key_connected(&mut self, key: &str, transport: TransportKind) {
        if key.is_empty() {
            warn!("Received a connected key message with an empty key");
            return;
        }
        *self.connected_keys.entry(key.to_string()).or_insert(0) += 1;
        self.stamp(key);
        debug!(
            key_fingerprint = %fingerprint(key),
            ?transport,
            sessions = self.connection_count(key),
            "Key connected"
        );

        if transport == TransportKind::Wifi && self.wifi_keys.insert(key) {
            self.publish_paired_devices();
            self.collaborators.ui.connected_notification(true);
        }
    }

    fn on_key_disconnected(&mut self, key: &str, transport: TransportKind) {
        if key.is_empty() {
            warn!("Received a disconnected key message with an empty key");
            return;
        }
        if let Some(count) = self.connected_keys.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.connected_keys.remove(key);
                self.stamp(key);
            }
        }

        if transport == TransportKind::Wifi && self.wifi_keys.remove(key) {
            self.publish_paired_devices();
            if self.wifi_keys.is_empty() {
                self.collaborators.ui.connected_notification(false);
            }
        }
    }

    /// Record a connection now, queue a persist and move the sweep.
    fn stamp(&mut self, key: &str) {
        let now = self.collaborators.clock.now_millis();
        self.ledger.set_last_connection_time(key, now, false);
        self.persist.request_persist();
        self.reschedule_expiration();
    }

    fn on_clear_authorizations(&mut self) {
        info!("Clearing adb authorizations");
        self.connected_keys.clear();
        self.wifi_keys.clear();
        self.ledger.delete_all();
        self.collaborators.scheduler.cancel(TimerSlot::KeyStoreUpdate);

        if !self.collaborators.settings.disconnect_sessions_on_revoke() || !self.usb_enabled {
            return;
        }
        if let Err(e) = self.cycle_daemon() {
            error!(error = %e, "adbd did not cycle after revoking grants");
            self.collaborators.toggles.set_usb_debugging_enabled(false);
            self.collaborators.ui.daemon_restart_failed();
        }
    }

    /// Stop then start adbd so sessions authorized by revoked keys drop.
    fn cycle_daemon(&self) -> LifecycleResult<()> {
        let timeout = self.options.daemon_state_change_timeout;
        self.collaborators.daemon.stop(timeout)?;
        self.collaborators.daemon.start(timeout)?;
        info!("adbd cycled");
        Ok(())
    }

    fn on_unpair(&mut self, fp: &str) {
        let Some(key) = self.ledger.find_key_from_fingerprint(fp) else {
            error!(key_fingerprint = %fp, "Not a known fingerprint");
            return;
        };
        self.send(TransportCommand::DisconnectDevice(key.clone()));
        self.ledger.remove_key(&key);
        self.publish_paired_devices();
        info!(key_fingerprint = %fp, "Device unpaired");
    }

    // ========================================================================
    // Wireless debugging
    // ========================================================================

    fn on_wifi_enabled(&mut self) {
        if self.wifi_enabled {
            return;
        }
        let Some(access_point) = self.collaborators.network.current_access_point() else {
            info!("Not connected to any wireless network, not enabling wireless debugging");
            self.collaborators.toggles.set_wifi_debugging_enabled(false);
            return;
        };
        if !self.ledger.is_trusted_network(&access_point.bssid) {
            self.collaborators
                .ui
                .confirm_network(&access_point.ssid, &access_point.bssid);
            self.collaborators.toggles.set_wifi_debugging_enabled(false);
            return;
        }
        self.start_wifi(access_point);
    }

    fn on_allow_network(&mut self, bssid: &str, always: bool) {
        if self.wifi_enabled {
            return;
        }
        if always {
            self.ledger.add_trusted_network(bssid);
        }

        // The device may have roamed while the user was deciding.
        let current = self.collaborators.network.current_access_point();
        let Some(access_point) = current.filter(|ap| ap.bssid == bssid) else {
            info!(bssid, "Access point changed before approval, not enabling");
            return;
        };
        self.collaborators.toggles.set_wifi_debugging_enabled(true);
        self.start_wifi(access_point);
    }

    fn start_wifi(&mut self, access_point: AccessPoint) {
        info!(bssid = %access_point.bssid, "Starting wireless debugging");
        self.connection_info = Some(ConnectionInfo::bind(access_point));
        self.ensure_reader_running();
        self.collaborators.port_discovery.start();
        self.send(TransportCommand::StartWifi);
        self.network_monitor.register();
        self.wifi_enabled = true;
    }

    fn disable_wifi(&mut self) {
        if !self.wifi_enabled {
            return;
        }
        self.wifi_enabled = false;
        self.connection_info = None;
        self.network_monitor.unregister();
        self.collaborators.port_discovery.stop();
        self.send(TransportCommand::StopWifi);
        self.on_wifi_server_gone(UNKNOWN_PORT);
        info!("Wireless debugging stopped");
    }

    /// Only ever turns wireless debugging off. Joining a trusted network
    /// does not turn it back on.
    fn on_network_changed(&mut self, access_point: Option<AccessPoint>) {
        if !self.wifi_enabled {
            debug!("Network change while wireless debugging is off");
            return;
        }
        match access_point {
            Some(access_point) => {
                let bound = self.connection_info.as_ref().map(|info| info.bssid.as_str());
                if bound == Some(access_point.bssid.as_str()) {
                    return;
                }
                info!(bssid = %access_point.bssid, "Roamed to another access point, disabling wireless debugging");
            }
            None => info!("Wi-Fi lost, disabling wireless debugging"),
        }
        self.collaborators.toggles.set_wifi_debugging_enabled(false);
        self.disable_wifi();
    }

    fn on_tls_port(&mut self, port: u16) {
        if port > 0 {
            let port = i32::from(port);
            if let Some(info) = self.connection_info.as_mut() {
                info.port = port;
            }
            self.publish_paired_devices();
            self.collaborators.ui.connection_state(true, port);
            return;
        }
        if !self.wifi_enabled {
            return;
        }
        self.on_wifi_server_gone(0);
        self.collaborators.port_discovery.stop();
    }

    fn on_link_up(&mut self) {
        self.transport_link_up = true;
        debug!("adbd socket connected");
        if self.wifi_enabled {
            // adbd may come back on a different TLS port.
            self.collaborators.port_discovery.start();
        }
    }

    fn on_link_down(&mut self) {
        self.transport_link_up = false;
        debug!("adbd socket disconnected");
        self.collaborators.port_discovery.stop();
        if self.wifi_enabled {
            self.on_wifi_server_gone(UNKNOWN_PORT);
        }
    }

    fn on_wifi_server_gone(&mut self, port: i32) {
        self.wifi_keys.clear();
        self.collaborators.ui.connected_notification(false);
        self.collaborators.ui.connection_state(false, port);
    }

    fn publish_paired_devices(&self) {
        self.collaborators.ui.paired_devices(&self.paired_devices());
    }

    // ========================================================================
    // Pairing
    // ========================================================================

    fn start_pairing(&mut self, secret: String, service_label: Option<String>) -> LifecycleResult<()> {
        let show_code = service_label.is_none();
        let session = self.pairing.begin(secret, service_label)?;
        let session_id = session.id;

        if show_code {
            self.collaborators.ui.pairing_code(&session.secret);
        }
        self.collaborators
            .pairing
            .start_advertising(&session.secret, session.service_label.as_deref());
        self.collaborators.scheduler.schedule(
            TimerJob::PairingTimeout { session_id },
            self.options.pairing_timeout,
        );
        info!(session_id, qr = !show_code, "Pairing started");
        Ok(())
    }

    /// Leave the active session. Advertisement teardown happens here and
    /// nowhere else.
    fn end_pairing(&mut self, input: PairingMachineInput) -> bool {
        match self.pairing.end(input) {
            Ok(session) => {
                self.collaborators.pairing.stop_advertising();
                self.collaborators.scheduler.cancel(TimerSlot::PairingTimeout);
                debug!(session_id = session.id, ?input, "Pairing ended");
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring pairing event");
                false
            }
        }
    }

    fn on_cancel_pairing(&mut self) {
        self.end_pairing(PairingMachineInput::Cancel);
    }

    fn on_pairing_completed(&mut self, key: Option<String>) {
        let input = if key.is_some() {
            PairingMachineInput::Succeed
        } else {
            PairingMachineInput::Fail
        };
        if !self.end_pairing(input) {
            return;
        }

        match key {
            Some(key) => {
                info!(key_fingerprint = %fingerprint(&key), "Pairing succeeded");
                self.stamp(&key);
                self.collaborators
                    .ui
                    .pairing_succeeded(&PairedDevice::from_key(&key, false));
            }
            None => {
                info!("Pairing failed");
                self.collaborators.ui.pairing_failed();
            }
        }
        self.publish_paired_devices();
    }

    fn on_pairing_timed_out(&mut self, session_id: u64) {
        if self.pairing.current().map(|session| session.id) != Some(session_id) {
            debug!(session_id, "Stale pairing timeout");
            return;
        }
        if self.end_pairing(PairingMachineInput::Timeout) {
            info!(session_id, "Pairing timed out");
            self.collaborators.ui.pairing_failed();
        }
    }

    // ========================================================================
    // Expiration
    // ========================================================================

    fn on_sweep_due(&mut self) {
        if !self.connected_keys.is_empty() {
            let now = self.collaborators.clock.now_millis();
            for key in self.connected_keys.keys() {
                self.ledger.set_last_connection_time(key, now, false);
            }
            self.persist.request_persist();
            self.reschedule_expiration();
        } else if !self.ledger.is_empty() {
            self.ledger.update();
            self.reschedule_expiration();
        }
    }

    fn reschedule_expiration(&self) {
        let scheduler = &self.collaborators.scheduler;
        scheduler.cancel(TimerSlot::KeyStoreUpdate);
        let next = self.ledger.next_expiration_time();
        if let Some(delay) = expiration_delay(next) {
            debug!(delay_ms = delay.as_millis() as u64, "Expiration sweep scheduled");
            scheduler.schedule(TimerJob::KeyStoreUpdate, delay);
        }
    }

    fn send(&self, command: TransportCommand) {
        self.collaborators.transport.send(command);
    }
}
