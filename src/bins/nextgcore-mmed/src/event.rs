//! MME Event Definitions
//!
//! Events consumed by the EMM state machine and the event produced for ESM.

use std::fmt;

use tokio::sync::mpsc;

use crate::context::{MmeBearerId, MmeUeId};
use crate::nas_message::NasMessage;

/// Diameter result code for success
pub const OGS_DIAM_SUCCESS: u32 = 2001;

/// Timer IDs for MME
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MmeTimerId {
    /// T3413 (Paging)
    T3413,
    /// T3422 (Detach request)
    T3422,
    /// T3450 (Attach accept / TAU accept / GUTI reallocation)
    T3450,
    /// T3460 (Authentication request / Security mode command)
    T3460,
    /// T3470 (Identity request)
    T3470,
    /// Mobile reachable timer
    MobileReachable,
    /// Implicit detach timer
    ImplicitDetach,
}

impl MmeTimerId {
    pub fn name(&self) -> &'static str {
        match self {
            MmeTimerId::T3413 => "MME_TIMER_T3413",
            MmeTimerId::T3422 => "MME_TIMER_T3422",
            MmeTimerId::T3450 => "MME_TIMER_T3450",
            MmeTimerId::T3460 => "MME_TIMER_T3460",
            MmeTimerId::T3470 => "MME_TIMER_T3470",
            MmeTimerId::MobileReachable => "MME_TIMER_MOBILE_REACHABLE",
            MmeTimerId::ImplicitDetach => "MME_TIMER_IMPLICIT_DETACH",
        }
    }
}

impl fmt::Display for MmeTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// GTP transaction handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GtpXactId(pub u64);

impl fmt::Display for GtpXactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decoded S11 (GTPv2-C) message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S11Message {
    CreateSessionResponse,
    DeleteSessionResponse,
    ModifyBearerResponse,
    DownlinkDataNotification { xact: GtpXactId },
    /// Message type the EMM layer does not handle
    Unknown(u8),
}

impl S11Message {
    pub fn name(&self) -> &'static str {
        match self {
            S11Message::CreateSessionResponse => "Create Session Response",
            S11Message::DeleteSessionResponse => "Delete Session Response",
            S11Message::ModifyBearerResponse => "Modify Bearer Response",
            S11Message::DownlinkDataNotification { .. } => "Downlink Data Notification",
            S11Message::Unknown(_) => "Unknown",
        }
    }
}

/// Decoded S6a (Diameter) answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S6aMessage {
    AuthenticationInformationAnswer { result_code: u32 },
    UpdateLocationAnswer { result_code: u32 },
    /// Command code the EMM layer does not handle
    Unknown(u32),
}

/// S6a command forwarded to ESM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S6aCommand {
    UpdateLocation,
}

/// Event addressed to the MME state machines
#[derive(Debug, Clone, PartialEq)]
pub enum MmeEvent {
    /// FSM entry signal
    FsmEntry,
    /// FSM exit signal
    FsmExit,
    /// S11 message about a bearer
    EmmBearerFromS11 {
        bearer: MmeBearerId,
        message: S11Message,
    },
    /// S6a answer for a UE
    EmmUeFromS6a { mme_ue: MmeUeId, message: S6aMessage },
    /// S11 message for a UE
    EmmUeFromS11 { mme_ue: MmeUeId, message: S11Message },
    /// Uplink NAS EMM message
    EmmUeMessage {
        mme_ue: MmeUeId,
        message: Option<NasMessage>,
    },
    /// EMM timer expiry
    EmmUeTimer { mme_ue: MmeUeId, timer: MmeTimerId },
    /// T3413 expiry
    EmmUeT3413 { mme_ue: MmeUeId },
    /// UE record released, per-UE worker state must go
    EmmUeRemoved { mme_ue: MmeUeId },
    /// S6a completion handed to the bearer's ESM state machine
    EsmBearerFromS6a {
        bearer: MmeBearerId,
        command: S6aCommand,
    },
}

/// Record an event is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    Ue(MmeUeId),
    Bearer(MmeBearerId),
    None,
}

impl MmeEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MmeEvent::FsmEntry => "OGS_FSM_ENTRY_SIG",
            MmeEvent::FsmExit => "OGS_FSM_EXIT_SIG",
            MmeEvent::EmmBearerFromS11 { .. } => "MME_EVENT_EMM_BEARER_FROM_S11",
            MmeEvent::EmmUeFromS6a { .. } => "MME_EVENT_EMM_UE_FROM_S6A",
            MmeEvent::EmmUeFromS11 { .. } => "MME_EVENT_EMM_UE_FROM_S11",
            MmeEvent::EmmUeMessage { .. } => "MME_EVENT_EMM_UE_MESSAGE",
            MmeEvent::EmmUeTimer { .. } => "MME_EVENT_EMM_UE_TIMER",
            MmeEvent::EmmUeT3413 { .. } => "MME_EVENT_EMM_UE_T3413",
            MmeEvent::EmmUeRemoved { .. } => "MME_EVENT_EMM_UE_REMOVED",
            MmeEvent::EsmBearerFromS6a { .. } => "MME_EVENT_ESM_BEARER_FROM_S6A",
        }
    }

    pub fn target(&self) -> EventTarget {
        match self {
            MmeEvent::EmmBearerFromS11 { bearer, .. }
            | MmeEvent::EsmBearerFromS6a { bearer, .. } => EventTarget::Bearer(*bearer),
            MmeEvent::EmmUeFromS6a { mme_ue, .. }
            | MmeEvent::EmmUeFromS11 { mme_ue, .. }
            | MmeEvent::EmmUeMessage { mme_ue, .. }
            | MmeEvent::EmmUeTimer { mme_ue, .. }
            | MmeEvent::EmmUeT3413 { mme_ue }
            | MmeEvent::EmmUeRemoved { mme_ue } => EventTarget::Ue(*mme_ue),
            MmeEvent::FsmEntry | MmeEvent::FsmExit => EventTarget::None,
        }
    }

    /// Builds the expiry event of a UE timer
    pub fn timer_expired(mme_ue: MmeUeId, timer: MmeTimerId) -> Self {
        match timer {
            MmeTimerId::T3413 => MmeEvent::EmmUeT3413 { mme_ue },
            _ => MmeEvent::EmmUeTimer { mme_ue, timer },
        }
    }

    /// Whether the event belongs to the ESM state machine
    pub fn is_esm(&self) -> bool {
        matches!(self, MmeEvent::EsmBearerFromS6a { .. })
    }
}

/// Sink accepting events for asynchronous processing
pub trait EventQueue: Send + Sync {
    fn send(&self, event: MmeEvent);
}

impl EventQueue for mpsc::UnboundedSender<MmeEvent> {
    fn send(&self, event: MmeEvent) {
        let name = event.name();
        if mpsc::UnboundedSender::send(self, event).is_err() {
            log::error!("Event queue closed, dropping {}", name);
        }
    }
}
