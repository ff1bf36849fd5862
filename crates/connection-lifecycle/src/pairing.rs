//! Pairing session state machine.
//!
//! ```text
//!           Start
//!   Idle ───────────► Active
//!    ▲                  │
//!    └──────────────────┘
//!   Cancel | Succeed | Fail | Timeout
//! ```
//!
//! At most one session exists. Its secret and label live only while the
//! machine is `Active`.

use crate::{LifecycleError, LifecycleResult};
use rand::rngs::OsRng;
use rand::Rng;
use rust_fsm::*;

pub const PAIRING_CODE_LENGTH: usize = 6;

state_machine! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub pairing_machine(Idle)

    Idle => {
        Start => Active
    },
    Active => {
        Cancel => Idle,
        Succeed => Idle,
        Fail => Idle,
        Timeout => Idle
    }
}

pub use pairing_machine::Input as PairingMachineInput;
pub use pairing_machine::State as PairingMachineState;
pub use pairing_machine::StateMachine as PairingMachine;

/// Six random decimal digits.
pub fn generate_pairing_code() -> String {
    (0..PAIRING_CODE_LENGTH)
        .map(|_| char::from(b'0' + OsRng.gen_range(0..10u8)))
        .collect()
}

/// Data for the session currently advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePairing {
    pub id: u64,
    pub secret: String,
    /// Service name for QR pairing; `None` for code pairing.
    pub service_label: Option<String>,
}

pub struct PairingSession {
    machine: PairingMachine,
    active: Option<ActivePairing>,
    next_id: u64,
}

impl Default for PairingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PairingSession {
    pub fn new() -> Self {
        Self {
            machine: PairingMachine::new(),
            active: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> PairingMachineState {
        *self.machine.state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == PairingMachineState::Active
    }

    pub fn current(&self) -> Option<&ActivePairing> {
        self.active.as_ref()
    }

    /// Open a session. Fails if one is already active.
    pub fn begin(
        &mut self,
        secret: String,
        service_label: Option<String>,
    ) -> LifecycleResult<&ActivePairing> {
        self.transition(PairingMachineInput::Start)?;
        let id = self.next_id;
        self.next_id += 1;
        let active = self.active.insert(ActivePairing {
            id,
            secret,
            service_label,
        });
        Ok(&*active)
    }

    /// Close the active session, handing back its data.
    ///
    /// `input` must be one of the exits from `Active`.
    pub fn end(&mut self, input: PairingMachineInput) -> LifecycleResult<ActivePairing> {
        if input == PairingMachineInput::Start {
            return Err(LifecycleError::InvalidState(
                "Start does not end a pairing session".to_string(),
            ));
        }
        self.transition(input)?;
        self.active.take().ok_or_else(|| {
            LifecycleError::InvalidState("active pairing session has no data".to_string())
        })
    }

    fn transition(&mut self, input: PairingMachineInput) -> LifecycleResult<()> {
        let from = self.state();
        self.machine.consume(&input).map_err(|_| {
            LifecycleError::InvalidState(format!("Cannot apply {input:?} to pairing in {from:?}"))
        })?;
        Ok(())
    }
}
