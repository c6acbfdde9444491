//! EMM State Machine
//!
//! Per-UE EMM state machine. Initial moves to Operational on the first
//! signal; Operational routes every event to the procedure dispatch in
//! `emm_sm`. Exception and Final only absorb events.

use std::fmt;

use crate::context::MmeUeId;
use crate::emm_sm::{self, EmmSmContext};
use crate::event::MmeEvent;

/// EMM State
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmState {
    /// Initial state
    Initial,
    /// Operational state
    Operational,
    /// Exception state
    Exception,
    /// Final state
    Final,
}

impl fmt::Display for EmmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmmState::Initial => write!(f, "INITIAL"),
            EmmState::Operational => write!(f, "OPERATIONAL"),
            EmmState::Exception => write!(f, "EXCEPTION"),
            EmmState::Final => write!(f, "FINAL"),
        }
    }
}

/// Outcome of dispatching one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmmFsmResult {
    /// Event handled
    Handled,
    /// Event not applicable in the current state
    Ignored,
    /// State changed
    Transition(EmmState),
    /// Event dropped on a contract violation
    Error,
}

/// Trace line for every event entering a state machine
pub fn mme_sm_debug(state: EmmState, event: &MmeEvent) {
    log::trace!("emm_state_{}(): {}", state.to_string().to_lowercase(), event.name());
}

/// EMM State Machine
#[derive(Debug)]
pub struct EmmFsm {
    /// Current state
    state: EmmState,
    /// MME UE ID
    mme_ue_id: MmeUeId,
}

impl EmmFsm {
    pub fn new(mme_ue_id: MmeUeId) -> Self {
        Self {
            state: EmmState::Initial,
            mme_ue_id,
        }
    }

    pub fn state(&self) -> EmmState {
        self.state
    }

    pub fn mme_ue_id(&self) -> MmeUeId {
        self.mme_ue_id
    }

    /// Transition to a new state.
    ///
    /// Also the entry point of an external supervisor moving the machine to
    /// Exception.
    pub fn transition(&mut self, new_state: EmmState) {
        log::debug!("EMM FSM [{}]: {} -> {}", self.mme_ue_id, self.state, new_state);
        self.state = new_state;
    }

    /// Initialize the state machine
    pub fn init(&mut self) {
        self.state = EmmState::Initial;
        self.state_initial(&MmeEvent::FsmEntry);
    }

    /// Finalize the state machine
    pub fn fini(&mut self) {
        mme_sm_debug(self.state, &MmeEvent::FsmExit);
        self.state = EmmState::Final;
    }

    /// Dispatch an event to the state machine
    pub fn dispatch(&mut self, sm: &mut EmmSmContext<'_>, event: MmeEvent) -> EmmFsmResult {
        match self.state {
            EmmState::Initial => self.state_initial(&event),
            EmmState::Operational => self.state_operational(sm, event),
            EmmState::Exception => self.state_exception(&event),
            EmmState::Final => self.state_final(&event),
        }
    }

    fn state_initial(&mut self, event: &MmeEvent) -> EmmFsmResult {
        mme_sm_debug(self.state, event);
        self.transition(EmmState::Operational);
        EmmFsmResult::Transition(EmmState::Operational)
    }

    fn state_operational(&mut self, sm: &mut EmmSmContext<'_>, event: MmeEvent) -> EmmFsmResult {
        mme_sm_debug(self.state, &event);

        match event {
            MmeEvent::FsmEntry | MmeEvent::FsmExit => EmmFsmResult::Handled,
            MmeEvent::EsmBearerFromS6a { .. } => {
                log::error!("Unknown event {}", event.name());
                EmmFsmResult::Ignored
            }
            event => {
                let name = event.name();
                match emm_sm::emm_state_operational(sm, event) {
                    Ok(()) => EmmFsmResult::Handled,
                    Err(e) => {
                        log::error!("{} dropped: {}", name, e);
                        EmmFsmResult::Error
                    }
                }
            }
        }
    }

    fn state_exception(&mut self, event: &MmeEvent) -> EmmFsmResult {
        mme_sm_debug(self.state, event);

        match event {
            MmeEvent::FsmEntry | MmeEvent::FsmExit => EmmFsmResult::Handled,
            _ => {
                log::error!("Unknown event {}", event.name());
                EmmFsmResult::Ignored
            }
        }
    }

    fn state_final(&mut self, event: &MmeEvent) -> EmmFsmResult {
        mme_sm_debug(self.state, event);

        match event {
            MmeEvent::FsmExit => EmmFsmResult::Handled,
            _ => EmmFsmResult::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MmeContext;
    use crate::emm_handler::{HandlerCall, RecordingHandler};
    use crate::event::{S11Message, S6aCommand, S6aMessage, OGS_DIAM_SUCCESS};
    use crate::nas_message::{EmmMessage, EmmStatus, NasMessage};
    use crate::path::RecordingPath;

    fn dispatch(
        fsm: &mut EmmFsm,
        ctx: &mut MmeContext,
        handler: &mut RecordingHandler,
        path: &mut RecordingPath,
        event: MmeEvent,
    ) -> EmmFsmResult {
        let mut sm = EmmSmContext {
            context: ctx,
            handler,
            path,
            max_paging_retry: 2,
        };
        fsm.dispatch(&mut sm, event)
    }

    #[test]
    fn test_emm_fsm_init() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let mut fsm = EmmFsm::new(ue);
        assert_eq!(fsm.state(), EmmState::Initial);
        fsm.init();
        assert_eq!(fsm.state(), EmmState::Operational);
        assert_eq!(fsm.mme_ue_id(), ue);
    }

    #[test]
    fn test_initial_moves_on_any_signal() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);

        let result = dispatch(
            &mut fsm,
            &mut ctx,
            &mut handler,
            &mut path,
            MmeEvent::EmmUeT3413 { mme_ue: ue },
        );
        assert_eq!(result, EmmFsmResult::Transition(EmmState::Operational));
        assert!(path.is_silent());
    }

    #[test]
    fn test_operational_routes_events() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);
        fsm.init();

        let event = MmeEvent::EmmUeMessage {
            mme_ue: ue,
            message: Some(NasMessage::plain(EmmMessage::EmmStatus(EmmStatus { emm_cause: 97 }))),
        };
        assert_eq!(
            dispatch(&mut fsm, &mut ctx, &mut handler, &mut path, event),
            EmmFsmResult::Handled
        );
        assert_eq!(handler.calls, vec![HandlerCall::EmmStatus(ue)]);

        assert_eq!(
            dispatch(&mut fsm, &mut ctx, &mut handler, &mut path, MmeEvent::FsmEntry),
            EmmFsmResult::Handled
        );
        assert_eq!(fsm.state(), EmmState::Operational);
    }

    #[test]
    fn test_operational_contract_violation() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);
        fsm.init();

        let result = dispatch(
            &mut fsm,
            &mut ctx,
            &mut handler,
            &mut path,
            MmeEvent::EmmUeMessage {
                mme_ue: ue,
                message: None,
            },
        );
        assert_eq!(result, EmmFsmResult::Error);
        assert_eq!(fsm.state(), EmmState::Operational);

        // the machine keeps going
        let result = dispatch(
            &mut fsm,
            &mut ctx,
            &mut handler,
            &mut path,
            MmeEvent::EmmUeFromS6a {
                mme_ue: ue,
                message: S6aMessage::UpdateLocationAnswer {
                    result_code: OGS_DIAM_SUCCESS,
                },
            },
        );
        assert_eq!(result, EmmFsmResult::Handled);
    }

    #[test]
    fn test_operational_ignores_esm_event() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let sess = ctx.sess_add(ue, 1).unwrap();
        let bearer = ctx.bearer_add(sess).unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);
        fsm.init();

        let result = dispatch(
            &mut fsm,
            &mut ctx,
            &mut handler,
            &mut path,
            MmeEvent::EsmBearerFromS6a {
                bearer,
                command: S6aCommand::UpdateLocation,
            },
        );
        assert_eq!(result, EmmFsmResult::Ignored);
        assert!(path.is_silent());
    }

    #[test]
    fn test_exception_absorbs_events() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let sess = ctx.sess_add(ue, 1).unwrap();
        let bearer = ctx.bearer_add(sess).unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);
        fsm.init();
        fsm.transition(EmmState::Exception);

        for event in [
            MmeEvent::EmmUeT3413 { mme_ue: ue },
            MmeEvent::EmmBearerFromS11 {
                bearer,
                message: S11Message::DownlinkDataNotification {
                    xact: crate::event::GtpXactId(1),
                },
            },
            MmeEvent::EmmUeMessage {
                mme_ue: ue,
                message: None,
            },
        ] {
            assert_eq!(
                dispatch(&mut fsm, &mut ctx, &mut handler, &mut path, event),
                EmmFsmResult::Ignored
            );
        }
        assert_eq!(
            dispatch(&mut fsm, &mut ctx, &mut handler, &mut path, MmeEvent::FsmExit),
            EmmFsmResult::Handled
        );
        assert_eq!(fsm.state(), EmmState::Exception);
        assert!(handler.calls.is_empty());
        assert!(path.is_silent());
    }

    #[test]
    fn test_final_is_terminal() {
        let mut ctx = MmeContext::new(4);
        let ue = ctx.mme_ue_add().unwrap();
        let mut handler = RecordingHandler::default();
        let mut path = RecordingPath::default();
        let mut fsm = EmmFsm::new(ue);
        fsm.init();
        fsm.fini();
        assert_eq!(fsm.state(), EmmState::Final);

        assert_eq!(
            dispatch(
                &mut fsm,
                &mut ctx,
                &mut handler,
                &mut path,
                MmeEvent::EmmUeT3413 { mme_ue: ue }
            ),
            EmmFsmResult::Ignored
        );
        assert_eq!(
            dispatch(&mut fsm, &mut ctx, &mut handler, &mut path, MmeEvent::FsmExit),
            EmmFsmResult::Handled
        );
        assert_eq!(fsm.state(), EmmState::Final);
        assert!(path.is_silent());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EmmState::Initial.to_string(), "INITIAL");
        assert_eq!(EmmState::Exception.to_string(), "EXCEPTION");
    }
}
