//! Connection lifecycle for adb host authorization.
//!
//! Every input (transport reports, UI answers, timers, network changes) is an
//! [`Event`] on one queue. [`ConnectionCoordinator`] drains that queue one
//! event at a time and is the only writer of the authorization ledger, the
//! connection refcounts and the Wi-Fi connected set.

mod collaborators;
mod coordinator;
mod error;
mod event;
mod network_monitor;
mod pairing;
mod persist_signal;
mod scheduler;
mod service;
mod transport_reader;
mod wifi_keys;

pub use collaborators::{
    Collaborators, DaemonService, DebugToggles, NetworkInfo, PairedDevice, PairingService,
    PortDiscovery, TransportCommand, TransportSink, UiNotifier,
};
pub use coordinator::{ConnectionCoordinator, ConnectionInfo, CoordinatorOptions, CoordinatorStatus};
pub use error::{LifecycleError, LifecycleResult};
pub use event::{AccessPoint, Event, EventReceiver, EventSender, TransportEvent, TransportKind};
pub use network_monitor::{WifiInfo, WifiNetworkMonitor};
pub use pairing::{
    generate_pairing_code, ActivePairing, PairingMachine, PairingMachineInput,
    PairingMachineState, PairingSession, PAIRING_CODE_LENGTH,
};
pub use persist_signal::PersistSignal;
pub use scheduler::{
    expiration_delay, Scheduler, TimerJob, TimerSlot, TokioScheduler,
    MAX_KEYSTORE_UPDATE_INTERVAL_MS, MIN_KEYSTORE_UPDATE_INTERVAL_MS,
};
pub use service::{CoordinatorHandle, ReaderLauncher};
pub use transport_reader::{
    spawn_transport_reader, ChannelTransportSink, TransportLink, TransportReaderHandle,
    DEFAULT_RECONNECT_BACKOFF,
};
pub use wifi_keys::WifiConnectedKeys;
