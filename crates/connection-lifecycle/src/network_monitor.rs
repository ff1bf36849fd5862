//! Turns raw Wi-Fi connectivity callbacks into `NetworkChanged` events.

use crate::event::{AccessPoint, Event, EventSender};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Network id reported when the radio is not associated.
const INVALID_NETWORK_ID: i32 = -1;

/// What the platform reports about the current Wi-Fi association.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiInfo {
    pub network_id: i32,
    pub bssid: Option<String>,
    pub ssid: Option<String>,
}

impl WifiInfo {
    fn access_point(&self) -> Option<AccessPoint> {
        if self.network_id == INVALID_NETWORK_ID {
            return None;
        }
        let bssid = self.bssid.as_deref().filter(|b| !b.is_empty())?;
        Some(AccessPoint::new(
            bssid,
            self.ssid.clone().unwrap_or_default(),
        ))
    }
}

/// Watches the Wi-Fi association while wireless debugging is on.
///
/// The coordinator registers it when wireless debugging starts and
/// unregisters it when it stops. Platform callbacks may arrive on any thread
/// and are dropped while unregistered. Capability callbacks repeat often for
/// the same access point; only changes are forwarded.
#[derive(Debug)]
pub struct WifiNetworkMonitor {
    events: EventSender,
    state: Mutex<MonitorState>,
}

#[derive(Debug, Default)]
struct MonitorState {
    registered: bool,
    last_bssid: Option<String>,
}

impl WifiNetworkMonitor {
    pub fn new(events: EventSender) -> Self {
        Self {
            events,
            state: Mutex::new(MonitorState::default()),
        }
    }

    /// Start listening. Returns `false` if already registered.
    pub fn register(&self) -> bool {
        let mut state = self.state.lock();
        if state.registered {
            return false;
        }
        state.registered = true;
        debug!("Wi-Fi network monitor registered");
        true
    }

    /// Stop listening and forget the last access point. Returns `false` if
    /// not registered.
    pub fn unregister(&self) -> bool {
        let mut state = self.state.lock();
        if !state.registered {
            return false;
        }
        *state = MonitorState::default();
        debug!("Wi-Fi network monitor unregistered");
        true
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    /// The platform reported new capabilities for the Wi-Fi network.
    /// `None` means no Wi-Fi details were attached.
    pub fn on_capabilities_changed(&self, info: Option<&WifiInfo>) {
        let mut state = self.state.lock();
        if !state.registered {
            return;
        }
        match info.and_then(WifiInfo::access_point) {
            Some(access_point) => {
                if state.last_bssid.as_deref() == Some(access_point.bssid.as_str()) {
                    return;
                }
                info!(bssid = %access_point.bssid, "Wi-Fi access point changed");
                state.last_bssid = Some(access_point.bssid.clone());
                self.post(Some(access_point));
            }
            None => {
                info!("Wi-Fi network info unavailable");
                state.last_bssid = None;
                self.post(None);
            }
        }
    }

    /// The Wi-Fi network went away.
    pub fn on_lost(&self) {
        let mut state = self.state.lock();
        if !state.registered {
            return;
        }
        info!("Wi-Fi network lost");
        state.last_bssid = None;
        self.post(None);
    }

    fn post(&self, access_point: Option<AccessPoint>) {
        let _ = self.events.send(Event::NetworkChanged { access_point });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventReceiver;
    use tokio::sync::mpsc;

    fn monitor() -> (WifiNetworkMonitor, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let monitor = WifiNetworkMonitor::new(tx);
        assert!(monitor.register());
        (monitor, rx)
    }

    fn wifi(network_id: i32, bssid: Option<&str>) -> WifiInfo {
        WifiInfo {
            network_id,
            bssid: bssid.map(str::to_string),
            ssid: Some("\"HomeNet\"".to_string()),
        }
    }

    fn lost() -> Event {
        Event::NetworkChanged { access_point: None }
    }

    fn changed_to(bssid: &str) -> Event {
        Event::NetworkChanged {
            access_point: Some(AccessPoint::new(bssid, "\"HomeNet\"")),
        }
    }

    #[test]
    fn lost_reports_no_access_point() {
        let (monitor, mut rx) = monitor();
        monitor.on_lost();
        assert_eq!(rx.try_recv(), Ok(lost()));
    }

    #[test]
    fn missing_or_invalid_info_reports_no_access_point() {
        let (monitor, mut rx) = monitor();

        monitor.on_capabilities_changed(None);
        monitor.on_capabilities_changed(Some(&wifi(-1, Some("aa:bb"))));
        monitor.on_capabilities_changed(Some(&wifi(1, None)));
        monitor.on_capabilities_changed(Some(&wifi(1, Some(""))));

        for _ in 0..4 {
            assert_eq!(rx.try_recv(), Ok(lost()));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn valid_access_point_is_reported() {
        let (monitor, mut rx) = monitor();
        monitor.on_capabilities_changed(Some(&wifi(1, Some("trusted_bssid"))));
        assert_eq!(rx.try_recv(), Ok(changed_to("trusted_bssid")));
    }

    #[test]
    fn same_bssid_is_reported_once() {
        let (monitor, mut rx) = monitor();
        let info = wifi(1, Some("trusted_bssid"));

        monitor.on_capabilities_changed(Some(&info));
        monitor.on_capabilities_changed(Some(&info));

        assert_eq!(rx.try_recv(), Ok(changed_to("trusted_bssid")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn roaming_reports_new_bssid() {
        let (monitor, mut rx) = monitor();
        monitor.on_capabilities_changed(Some(&wifi(1, Some("ap-1"))));
        monitor.on_capabilities_changed(Some(&wifi(1, Some("ap-2"))));

        assert_eq!(rx.try_recv(), Ok(changed_to("ap-1")));
        assert_eq!(rx.try_recv(), Ok(changed_to("ap-2")));
    }

    #[test]
    fn lost_allows_same_bssid_again() {
        let (monitor, mut rx) = monitor();
        let info = wifi(1, Some("trusted_bssid"));

        monitor.on_capabilities_changed(Some(&info));
        monitor.on_lost();
        monitor.on_capabilities_changed(Some(&info));

        assert_eq!(rx.try_recv(), Ok(changed_to("trusted_bssid")));
        assert_eq!(rx.try_recv(), Ok(lost()));
        assert_eq!(rx.try_recv(), Ok(changed_to("trusted_bssid")));
    }

    #[test]
    fn register_is_idempotent() {
        let (monitor, _rx) = monitor();
        assert!(!monitor.register());
        assert!(monitor.is_registered());
    }

    #[test]
    fn unregistered_monitor_ignores_callbacks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let monitor = WifiNetworkMonitor::new(tx);

        monitor.on_lost();
        monitor.on_capabilities_changed(Some(&wifi(1, Some("ap"))));

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reports_after_unregister_are_dropped() {
        let (monitor, mut rx) = monitor();
        monitor.on_capabilities_changed(Some(&wifi(1, Some("ap-1"))));
        assert_eq!(rx.try_recv(), Ok(changed_to("ap-1")));

        assert!(monitor.unregister());
        assert!(!monitor.unregister());
        monitor.on_lost();
        monitor.on_capabilities_changed(Some(&wifi(1, Some("ap-2"))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn reregistering_forgets_last_access_point() {
        let (monitor, mut rx) = monitor();
        let info = wifi(1, Some("ap-1"));
        monitor.on_capabilities_changed(Some(&info));
        monitor.unregister();

        assert!(monitor.register());
        monitor.on_capabilities_changed(Some(&info));

        assert_eq!(rx.try_recv(), Ok(changed_to("ap-1")));
        assert_eq!(rx.try_recv(), Ok(changed_to("ap-1")));
    }
}
