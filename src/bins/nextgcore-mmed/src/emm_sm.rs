//! EMM event routing and procedure dispatch
//!
//! Work done by the EMM state machine while Operational: resolve the record
//! an event addresses, then hand it to the procedure handler for its kind.

use crate::context::{MmeBearerId, MmeContext, MmeUe, MmeUeId, PagingType};
use crate::emm_handler::{EmmError, EmmHandler, EmmResult};
use crate::event::{MmeEvent, MmeTimerId, S11Message, S6aCommand, S6aMessage, OGS_DIAM_SUCCESS};
use crate::nas_message::{EmmMessage, NasMessage, SecurityHeaderType};
use crate::paging;
use crate::path::EmmPath;

/// Collaborators lent to the state machine for one event
pub struct EmmSmContext<'a> {
    pub context: &'a mut MmeContext,
    pub handler: &'a mut dyn EmmHandler,
    pub path: &'a mut dyn EmmPath,
    /// T3413 retransmission bound
    pub max_paging_retry: u32,
}

/// Logs the outcome of a procedure handler. Handler failures end the
/// procedure step, not the event stream.
fn log_handler_result(imsi: &str, procedure: &str, result: EmmResult<()>) {
    if let Err(e) = result {
        log::warn!("[{}] {} failed: {}", imsi, procedure, e);
    }
}

fn find_mme_ue<'c>(context: &'c mut MmeContext, id: MmeUeId) -> EmmResult<&'c mut MmeUe> {
    context
        .mme_ue_find_by_id_mut(id)
        .ok_or(EmmError::UeNotFound(id))
}

/// Routes an event in the Operational state.
///
/// An `Err` is always a contract violation: the addressed record does not
/// exist or the payload is missing. Nothing was changed in that case.
pub fn emm_state_operational(sm: &mut EmmSmContext<'_>, event: MmeEvent) -> EmmResult<()> {
    match event {
        MmeEvent::EmmBearerFromS11 { bearer, message } => bearer_from_s11(sm, bearer, message),
        MmeEvent::EmmUeFromS6a { mme_ue, message } => ue_from_s6a(sm, mme_ue, message),
        MmeEvent::EmmUeFromS11 { mme_ue, message } => ue_from_s11(sm, mme_ue, message),
        MmeEvent::EmmUeMessage { mme_ue, message } => ue_message(sm, mme_ue, message),
        MmeEvent::EmmUeTimer { mme_ue, timer } => ue_timer(sm, mme_ue, timer),
        MmeEvent::EmmUeT3413 { mme_ue } => ue_t3413(sm, mme_ue),
        event @ (MmeEvent::FsmEntry
        | MmeEvent::FsmExit
        | MmeEvent::EmmUeRemoved { .. }
        | MmeEvent::EsmBearerFromS6a { .. }) => {
            log::error!("Unknown event {}", event.name());
            Ok(())
        }
    }
}

fn bearer_from_s11(
    sm: &mut EmmSmContext<'_>,
    bearer_id: MmeBearerId,
    message: S11Message,
) -> EmmResult<()> {
    let bearer = sm
        .context
        .bearer_find_by_id(bearer_id)
        .ok_or(EmmError::BearerNotFound(bearer_id))?;

    match message {
        S11Message::CreateSessionResponse => {
            let result = sm.handler.create_session_response(bearer);
            log_handler_result("-", "Create Session Response", result);
        }
        S11Message::DeleteSessionResponse => {
            let result = sm.handler.delete_session_response(bearer);
            log_handler_result("-", "Delete Session Response", result);
        }
        S11Message::DownlinkDataNotification { xact } => {
            let mme_ue_id = bearer.mme_ue_id;
            let result = sm.handler.downlink_data_notification(xact, bearer);
            log_handler_result("-", "Downlink Data Notification", result);

            let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;
            paging::mme_ue_paging_start(mme_ue, sm.path, PagingType::DownlinkDataNotification);
        }
        S11Message::ModifyBearerResponse | S11Message::Unknown(_) => {
            log::error!("Unknown S11 message [{}] for bearer", message.name());
        }
    }
    Ok(())
}

fn ue_from_s6a(
    sm: &mut EmmSmContext<'_>,
    mme_ue_id: MmeUeId,
    message: S6aMessage,
) -> EmmResult<()> {
    let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;

    match message {
        S6aMessage::AuthenticationInformationAnswer { result_code } => {
            let result = sm.handler.s6a_aia(mme_ue, result_code);
            log_handler_result(mme_ue.imsi_or_dash(), "Authentication-Information", result);
        }
        S6aMessage::UpdateLocationAnswer { result_code } => {
            if result_code != OGS_DIAM_SUCCESS {
                log::warn!(
                    "[{}] Update-Location failed [{}]",
                    mme_ue.imsi_or_dash(),
                    result_code
                );
                return Ok(());
            }
            update_location_fan_out(sm.context, sm.path, mme_ue_id);
        }
        S6aMessage::Unknown(command_code) => {
            log::error!("Unknown S6a command [{}]", command_code);
        }
    }
    Ok(())
}

/// Enqueues one ESM Update-Location event per bearer of the UE, sessions in
/// order and bearers in order within each session
fn update_location_fan_out(context: &MmeContext, path: &mut dyn EmmPath, mme_ue_id: MmeUeId) {
    let Some(mme_ue) = context.mme_ue_find_by_id(mme_ue_id) else {
        return;
    };

    for sess_id in mme_ue.sess_list.iter().copied() {
        let Some(sess) = context.sess_find_by_id(sess_id) else {
            log::error!("{}", EmmError::SessNotFound(sess_id));
            continue;
        };
        for bearer_id in sess.bearer_list.iter().copied() {
            if context.bearer_find_by_id(bearer_id).is_none() {
                log::error!("{}", EmmError::BearerNotFound(bearer_id));
                continue;
            }
            path.send_event(MmeEvent::EsmBearerFromS6a {
                bearer: bearer_id,
                command: S6aCommand::UpdateLocation,
            });
        }
    }
}

fn ue_from_s11(
    sm: &mut EmmSmContext<'_>,
    mme_ue_id: MmeUeId,
    message: S11Message,
) -> EmmResult<()> {
    let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;

    match message {
        S11Message::ModifyBearerResponse => {
            log::debug!("[GTP] Modify Bearer Response : MME <-- SGW [{}]", mme_ue.imsi_or_dash());
        }
        other => {
            log::error!("Unknown S11 message [{}] for UE", other.name());
        }
    }
    Ok(())
}

fn ue_message(
    sm: &mut EmmSmContext<'_>,
    mme_ue_id: MmeUeId,
    message: Option<NasMessage>,
) -> EmmResult<()> {
    let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;
    let message = message.ok_or(EmmError::MissingPayload("NAS message"))?;

    let service_request_header = message.security_header_type == SecurityHeaderType::ServiceRequest;
    if service_request_header && !matches!(message.emm, EmmMessage::ServiceRequest(_)) {
        return Err(EmmError::MissingPayload("Service Request"));
    }

    mme_ue.last_emm_message = Some(message.clone());

    if service_request_header {
        let EmmMessage::ServiceRequest(service_request) = &message.emm else {
            return Err(EmmError::MissingPayload("Service Request"));
        };
        paging::mme_ue_paged(mme_ue, sm.path);
        let result = sm.handler.service_request(mme_ue, service_request);
        log_handler_result(mme_ue.imsi_or_dash(), "Service request", result);
        return Ok(());
    }

    match &message.emm {
        EmmMessage::AttachRequest(req) => {
            paging::mme_ue_paged(mme_ue, sm.path);
            let result = sm.handler.attach_request(mme_ue, req);
            log_handler_result(mme_ue.imsi_or_dash(), "Attach request", result);
        }
        EmmMessage::IdentityResponse(rsp) => {
            let result = sm.handler.identity_response(mme_ue, rsp);
            log_handler_result(mme_ue.imsi_or_dash(), "Identity response", result);
        }
        EmmMessage::AuthenticationResponse(rsp) => {
            let result = sm.handler.authentication_response(mme_ue, rsp);
            log_handler_result(mme_ue.imsi_or_dash(), "Authentication response", result);
        }
        EmmMessage::SecurityModeComplete(_) => {
            log::debug!("[NAS] Security mode complete : UE[{}] --> EMM", mme_ue.imsi_bcd);

            if mme_ue.security_context_available {
                mme_ue.kenb = sm.path.kdf_enb(&mme_ue.kasme, mme_ue.ul_count);
            }
            sm.path.s6a_send_ulr(mme_ue);
        }
        EmmMessage::AttachComplete(msg) => {
            log::debug!("[NAS] Attach complete : UE[{}] --> EMM", mme_ue.imsi_bcd);
            let result = sm.handler.attach_complete(mme_ue, msg);
            log_handler_result(mme_ue.imsi_or_dash(), "Attach complete", result);
        }
        EmmMessage::EmmStatus(msg) => {
            let result = sm.handler.emm_status(mme_ue, msg);
            log_handler_result(mme_ue.imsi_or_dash(), "EMM status", result);
        }
        EmmMessage::DetachRequest(req) => {
            let result = sm.handler.detach_request(mme_ue, req);
            log_handler_result(mme_ue.imsi_or_dash(), "Detach request", result);
        }
        EmmMessage::TrackingAreaUpdateRequest(_) => {
            paging::mme_ue_paged(mme_ue, sm.path);
        }
        EmmMessage::ServiceRequest(_) | EmmMessage::Other { .. } => {
            log::warn!("Not implemented(type:{})", message.message_type());
        }
    }
    Ok(())
}

fn ue_timer(sm: &mut EmmSmContext<'_>, mme_ue_id: MmeUeId, timer: MmeTimerId) -> EmmResult<()> {
    let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;
    log::debug!("[{}] {} expired", mme_ue.imsi_or_dash(), timer);
    Ok(())
}

fn ue_t3413(sm: &mut EmmSmContext<'_>, mme_ue_id: MmeUeId) -> EmmResult<()> {
    let mme_ue = find_mme_ue(sm.context, mme_ue_id)?;
    paging::mme_ue_t3413_expire(mme_ue, sm.path, sm.max_paging_retry);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{MmeSessId, OGS_SHA256_DIGEST_SIZE};
    use crate::emm_handler::{HandlerCall, RecordingHandler};
    use crate::event::GtpXactId;
    use crate::kdf;
    use crate::nas_message::{
        AttachComplete, AttachRequest, AuthenticationResponse, DetachRequestFromUe, EmmStatus,
        EpsMobileIdentity, IdentityResponse, MobileIdentity, NasKeySetIdentifier,
        SecurityModeComplete, ServiceRequest, TrackingAreaUpdateRequest,
    };
    use crate::path::RecordingPath;
    use bytes::Bytes;

    struct Harness {
        context: MmeContext,
        handler: RecordingHandler,
        path: RecordingPath,
        max_paging_retry: u32,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                context: MmeContext::new(16),
                handler: RecordingHandler::default(),
                path: RecordingPath::default(),
                max_paging_retry: 2,
            }
        }

        fn dispatch(&mut self, event: MmeEvent) -> EmmResult<()> {
            let mut sm = EmmSmContext {
                context: &mut self.context,
                handler: &mut self.handler,
                path: &mut self.path,
                max_paging_retry: self.max_paging_retry,
            };
            emm_state_operational(&mut sm, event)
        }

        fn ue(&mut self) -> MmeUeId {
            self.context.mme_ue_add().unwrap()
        }

        fn mme_ue(&self, id: MmeUeId) -> &MmeUe {
            self.context.mme_ue_find_by_id(id).unwrap()
        }

        fn mme_ue_mut(&mut self, id: MmeUeId) -> &mut MmeUe {
            self.context.mme_ue_find_by_id_mut(id).unwrap()
        }

        fn sess_with_bearers(
            &mut self,
            ue: MmeUeId,
            count: usize,
        ) -> (MmeSessId, Vec<MmeBearerId>) {
            let sess = self.context.sess_add(ue, 1).unwrap();
            let bearers = (0..count).map(|_| self.context.bearer_add(sess).unwrap()).collect();
            (sess, bearers)
        }
    }

    fn nas(mme_ue: MmeUeId, emm: EmmMessage) -> MmeEvent {
        MmeEvent::EmmUeMessage {
            mme_ue,
            message: Some(NasMessage::plain(emm)),
        }
    }

    fn attach_request() -> EmmMessage {
        EmmMessage::AttachRequest(AttachRequest {
            eps_attach_type: 1,
            nas_key_set_identifier: NasKeySetIdentifier::default(),
            eps_mobile_identity: EpsMobileIdentity::Imsi("001010000000001".to_string()),
            esm_message_container: Bytes::new(),
        })
    }

    fn ula(mme_ue: MmeUeId) -> MmeEvent {
        MmeEvent::EmmUeFromS6a {
            mme_ue,
            message: S6aMessage::UpdateLocationAnswer {
                result_code: OGS_DIAM_SUCCESS,
            },
        }
    }

    #[test]
    fn test_update_location_fan_out_order() {
        let mut h = Harness::new();
        let ue = h.ue();
        let (_, s1_bearers) = h.sess_with_bearers(ue, 3);
        let (_, s2_bearers) = h.sess_with_bearers(ue, 1);

        h.dispatch(ula(ue)).unwrap();

        let expected: Vec<MmeEvent> = s1_bearers
            .iter()
            .chain(s2_bearers.iter())
            .map(|b| MmeEvent::EsmBearerFromS6a {
                bearer: *b,
                command: S6aCommand::UpdateLocation,
            })
            .collect();
        assert_eq!(h.path.events, expected);
    }

    #[test]
    fn test_update_location_without_sessions() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.dispatch(ula(ue)).unwrap();
        assert!(h.path.events.is_empty());
    }

    #[test]
    fn test_update_location_failure_no_fan_out() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.sess_with_bearers(ue, 2);

        h.dispatch(MmeEvent::EmmUeFromS6a {
            mme_ue: ue,
            message: S6aMessage::UpdateLocationAnswer { result_code: 5001 },
        })
        .unwrap();
        assert!(h.path.events.is_empty());
    }

    #[test]
    fn test_aia_forwards_result_code() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.dispatch(MmeEvent::EmmUeFromS6a {
            mme_ue: ue,
            message: S6aMessage::AuthenticationInformationAnswer { result_code: 5420 },
        })
        .unwrap();
        assert_eq!(h.handler.calls, vec![HandlerCall::S6aAia(ue, 5420)]);
    }

    #[test]
    fn test_service_request_bypass() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).paging.ongoing = true;

        let message = NasMessage::service_request(ServiceRequest::default());
        h.dispatch(MmeEvent::EmmUeMessage {
            mme_ue: ue,
            message: Some(message.clone()),
        })
        .unwrap();

        assert_eq!(h.handler.calls, vec![HandlerCall::ServiceRequest(ue)]);
        assert!(!h.mme_ue(ue).paging.ongoing);
        assert_eq!(h.mme_ue(ue).last_emm_message, Some(message));
        assert_eq!(h.path.timer_stops, vec![(ue, MmeTimerId::T3413)]);
    }

    #[test]
    fn test_service_request_header_with_other_body() {
        let mut h = Harness::new();
        let ue = h.ue();
        let message = NasMessage::protected(SecurityHeaderType::ServiceRequest, attach_request());

        let err = h
            .dispatch(MmeEvent::EmmUeMessage {
                mme_ue: ue,
                message: Some(message.clone()),
            })
            .unwrap_err();
        assert!(err.is_contract_violation());
        assert!(h.handler.calls.is_empty());
        assert!(h.mme_ue(ue).last_emm_message.is_none());
        assert!(h.path.is_silent());

        // an earlier cached message survives the rejected one
        let status = NasMessage::plain(EmmMessage::EmmStatus(EmmStatus { emm_cause: 98 }));
        h.dispatch(MmeEvent::EmmUeMessage {
            mme_ue: ue,
            message: Some(status.clone()),
        })
        .unwrap();
        h.dispatch(MmeEvent::EmmUeMessage {
            mme_ue: ue,
            message: Some(message),
        })
        .unwrap_err();
        assert_eq!(h.mme_ue(ue).last_emm_message, Some(status));
    }

    #[test]
    fn test_attach_request_clears_paging() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).paging.ongoing = true;
        h.mme_ue_mut(ue).t3413.retry_count = 1;

        h.dispatch(nas(ue, attach_request())).unwrap();

        assert_eq!(h.handler.calls, vec![HandlerCall::AttachRequest(ue)]);
        assert!(!h.mme_ue(ue).paging.ongoing);
        assert_eq!(h.mme_ue(ue).t3413.retry_count, 0);
    }

    #[test]
    fn test_tau_request_only_clears_paging() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).paging.ongoing = true;

        h.dispatch(nas(
            ue,
            EmmMessage::TrackingAreaUpdateRequest(TrackingAreaUpdateRequest {
                eps_update_type: 0,
                active_flag: false,
                nas_key_set_identifier: NasKeySetIdentifier::default(),
                old_guti: EpsMobileIdentity::Imsi("001010000000001".to_string()),
            }),
        ))
        .unwrap();

        assert!(h.handler.calls.is_empty());
        assert!(!h.mme_ue(ue).paging.ongoing);
        assert!(h.path.events.is_empty());
        assert!(h.path.ulrs.is_empty());
    }

    #[test]
    fn test_security_mode_complete_with_valid_context() {
        let mut h = Harness::new();
        let ue = h.ue();
        {
            let mme_ue = h.mme_ue_mut(ue);
            mme_ue.security_context_available = true;
            mme_ue.kasme = [0x42; OGS_SHA256_DIGEST_SIZE];
            mme_ue.ul_count = 7;
        }

        h.dispatch(nas(ue, EmmMessage::SecurityModeComplete(SecurityModeComplete::default())))
            .unwrap();

        assert_eq!(h.path.kdf_calls.get(), 1);
        assert_eq!(h.mme_ue(ue).kenb, kdf::mme_kdf_enb(&[0x42; OGS_SHA256_DIGEST_SIZE], 7));
        assert_eq!(h.path.ulrs, vec![ue]);
    }

    #[test]
    fn test_security_mode_complete_without_context() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).kasme = [0x42; OGS_SHA256_DIGEST_SIZE];

        h.dispatch(nas(ue, EmmMessage::SecurityModeComplete(SecurityModeComplete::default())))
            .unwrap();

        assert_eq!(h.path.kdf_calls.get(), 0);
        assert_eq!(h.mme_ue(ue).kenb, [0u8; OGS_SHA256_DIGEST_SIZE]);
        assert_eq!(h.path.ulrs, vec![ue]);
    }

    #[test]
    fn test_nas_dispatch_table() {
        let mut h = Harness::new();
        let ue = h.ue();

        h.dispatch(nas(ue, EmmMessage::AttachComplete(AttachComplete::default())))
            .unwrap();
        h.dispatch(nas(ue, EmmMessage::EmmStatus(EmmStatus { emm_cause: 98 })))
            .unwrap();
        h.dispatch(nas(ue, EmmMessage::Other { message_type: 0x4c }))
            .unwrap();

        assert_eq!(
            h.handler.calls,
            vec![HandlerCall::AttachComplete(ue), HandlerCall::EmmStatus(ue)]
        );
        assert_eq!(
            h.mme_ue(ue).last_emm_message,
            Some(NasMessage::plain(EmmMessage::Other { message_type: 0x4c }))
        );
    }

    #[test]
    fn test_identity_authentication_detach_dispatch() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).paging.ongoing = true;

        let identity = EmmMessage::IdentityResponse(IdentityResponse {
            mobile_identity: MobileIdentity::Imsi("001010000000002".to_string()),
        });
        h.dispatch(nas(ue, identity.clone())).unwrap();
        assert_eq!(h.handler.calls, vec![HandlerCall::IdentityResponse(ue)]);
        assert_eq!(h.mme_ue(ue).last_emm_message, Some(NasMessage::plain(identity)));

        let authentication = EmmMessage::AuthenticationResponse(AuthenticationResponse {
            authentication_response_parameter: Bytes::from_static(&[0xa5; 8]),
        });
        let message = NasMessage::protected(SecurityHeaderType::IntegrityProtected, authentication);
        h.dispatch(MmeEvent::EmmUeMessage {
            mme_ue: ue,
            message: Some(message.clone()),
        })
        .unwrap();
        assert_eq!(h.handler.calls.last(), Some(&HandlerCall::AuthenticationResponse(ue)));
        assert_eq!(h.mme_ue(ue).last_emm_message, Some(message));

        let detach = EmmMessage::DetachRequest(DetachRequestFromUe {
            detach_type: 1,
            switch_off: true,
            nas_key_set_identifier: NasKeySetIdentifier::default(),
            eps_mobile_identity: EpsMobileIdentity::Imsi("001010000000002".to_string()),
        });
        h.dispatch(nas(ue, detach.clone())).unwrap();

        assert_eq!(
            h.handler.calls,
            vec![
                HandlerCall::IdentityResponse(ue),
                HandlerCall::AuthenticationResponse(ue),
                HandlerCall::DetachRequest(ue),
            ]
        );
        assert_eq!(h.mme_ue(ue).last_emm_message, Some(NasMessage::plain(detach)));

        // none of these procedures touch paging
        assert!(h.mme_ue(ue).paging.ongoing);
        assert!(h.path.is_silent());
    }

    #[test]
    fn test_missing_nas_payload() {
        let mut h = Harness::new();
        let ue = h.ue();

        let err = h
            .dispatch(MmeEvent::EmmUeMessage {
                mme_ue: ue,
                message: None,
            })
            .unwrap_err();
        assert_eq!(err, EmmError::MissingPayload("NAS message"));
        assert!(h.mme_ue(ue).last_emm_message.is_none());
        assert!(h.path.is_silent());
    }

    #[test]
    fn test_unresolved_ue() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.context.mme_ue_remove(ue);

        for event in [
            nas(ue, attach_request()),
            ula(ue),
            MmeEvent::EmmUeT3413 { mme_ue: ue },
            MmeEvent::EmmUeTimer {
                mme_ue: ue,
                timer: MmeTimerId::T3450,
            },
            MmeEvent::EmmUeFromS11 {
                mme_ue: ue,
                message: S11Message::ModifyBearerResponse,
            },
        ] {
            assert_eq!(h.dispatch(event), Err(EmmError::UeNotFound(ue)));
        }
        assert!(h.handler.calls.is_empty());
        assert!(h.path.is_silent());
    }

    #[test]
    fn test_unresolved_bearer() {
        let mut h = Harness::new();
        let ue = h.ue();
        let (_, bearers) = h.sess_with_bearers(ue, 1);
        h.context.bearer_remove(bearers[0]);

        let err = h
            .dispatch(MmeEvent::EmmBearerFromS11 {
                bearer: bearers[0],
                message: S11Message::CreateSessionResponse,
            })
            .unwrap_err();
        assert_eq!(err, EmmError::BearerNotFound(bearers[0]));
        assert!(h.handler.calls.is_empty());
    }

    #[test]
    fn test_bearer_from_s11() {
        let mut h = Harness::new();
        let ue = h.ue();
        let (_, bearers) = h.sess_with_bearers(ue, 1);
        let bearer = bearers[0];

        h.dispatch(MmeEvent::EmmBearerFromS11 {
            bearer,
            message: S11Message::CreateSessionResponse,
        })
        .unwrap();
        h.dispatch(MmeEvent::EmmBearerFromS11 {
            bearer,
            message: S11Message::DeleteSessionResponse,
        })
        .unwrap();
        h.dispatch(MmeEvent::EmmBearerFromS11 {
            bearer,
            message: S11Message::Unknown(0x60),
        })
        .unwrap();

        assert_eq!(
            h.handler.calls,
            vec![
                HandlerCall::CreateSessionResponse(bearer),
                HandlerCall::DeleteSessionResponse(bearer)
            ]
        );
        assert!(h.path.is_silent());
    }

    #[test]
    fn test_downlink_data_notification_starts_paging() {
        let mut h = Harness::new();
        let ue = h.ue();
        let (_, bearers) = h.sess_with_bearers(ue, 1);
        h.path.paging_pdu = Some(Bytes::from_static(b"s1ap-paging"));

        h.dispatch(MmeEvent::EmmBearerFromS11 {
            bearer: bearers[0],
            message: S11Message::DownlinkDataNotification { xact: GtpXactId(9) },
        })
        .unwrap();

        assert_eq!(
            h.handler.calls,
            vec![HandlerCall::DownlinkDataNotification(GtpXactId(9), bearers[0])]
        );
        assert_eq!(h.path.pagings, vec![ue]);
        assert_eq!(h.path.timer_starts, vec![(ue, MmeTimerId::T3413)]);
        assert!(h.mme_ue(ue).paging.ongoing);
        assert!(h.mme_ue(ue).t3413.pkbuf.is_some());
    }

    #[test]
    fn test_t3413_retry_then_give_up() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.mme_ue_mut(ue).paging.ongoing = true;
        h.mme_ue_mut(ue).t3413.pkbuf = Some(Bytes::from_static(b"s1ap-paging"));

        h.dispatch(MmeEvent::EmmUeT3413 { mme_ue: ue }).unwrap();
        h.dispatch(MmeEvent::EmmUeT3413 { mme_ue: ue }).unwrap();
        assert_eq!(h.path.pagings.len(), 2);
        assert_eq!(h.mme_ue(ue).t3413.retry_count, 2);

        h.dispatch(MmeEvent::EmmUeT3413 { mme_ue: ue }).unwrap();
        assert_eq!(h.path.pagings.len(), 2);
        assert_eq!(h.path.timer_starts.len(), 2);
        assert!(h.mme_ue(ue).t3413.pkbuf.is_none());
        assert!(!h.mme_ue(ue).paging.ongoing);
    }

    #[test]
    fn test_modify_bearer_response_is_idempotent() {
        let mut h = Harness::new();
        let ue = h.ue();
        let event = MmeEvent::EmmUeFromS11 {
            mme_ue: ue,
            message: S11Message::ModifyBearerResponse,
        };

        h.dispatch(event.clone()).unwrap();
        h.dispatch(event).unwrap();

        let mme_ue = h.mme_ue(ue);
        assert!(mme_ue.last_emm_message.is_none());
        assert!(!mme_ue.paging.ongoing);
        assert!(h.handler.calls.is_empty());
        assert!(h.path.is_silent());
    }

    #[test]
    fn test_generic_timer_is_noop() {
        let mut h = Harness::new();
        let ue = h.ue();
        h.dispatch(MmeEvent::EmmUeTimer {
            mme_ue: ue,
            timer: MmeTimerId::T3460,
        })
        .unwrap();
        assert!(h.path.is_silent());
        assert!(h.handler.calls.is_empty());
    }

    #[test]
    fn test_esm_event_is_unknown() {
        let mut h = Harness::new();
        let ue = h.ue();
        let (_, bearers) = h.sess_with_bearers(ue, 1);

        h.dispatch(MmeEvent::EsmBearerFromS6a {
            bearer: bearers[0],
            command: S6aCommand::UpdateLocation,
        })
        .unwrap();
        assert!(h.path.is_silent());
    }
}
