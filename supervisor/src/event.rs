//! Supervisor event stream
//!
//! Events are published on a broadcast channel so the (out-of-scope) display
//! layer can follow state changes and the diagnostic log without polling.

use crate::automation::SequenceKind;
use crate::state::{CompositeSafety, MountSafety};
use obsy_devices::ShutterState;
use serde::{Deserialize, Serialize};

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// Events published by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SupervisorEvent {
    ShutterChanged { from: ShutterState, to: ShutterState },
    MountSafetyChanged { from: MountSafety, to: MountSafety },
    ConditionsChanged(CompositeSafety),
    RelayChanged { channel: usize, on: bool },

    SequenceStarted { kind: SequenceKind },
    SequenceCompleted { kind: SequenceKind },
    SequenceFailed { kind: SequenceKind, reason: String },

    /// A slew abort was issued, by the operator or by an interlock.
    AbortIssued,
    /// The mount's power circuits were de-energized as a last resort.
    MountPowerDown,
    /// A command needs operator confirmation before it will be issued.
    ConfirmationRequired { command: String, reason: String },

    Diagnostic { severity: EventSeverity, message: String },
}
