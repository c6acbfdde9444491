//! EMM Message Handling
//!
//! Procedure handlers invoked by the EMM state machine, one per uplink NAS
//! message and per cross-layer response.

use thiserror::Error;

use crate::context::{MmeBearer, MmeBearerId, MmeEpsType, MmeSessId, MmeUe, MmeUeId, NasEpsKsi};
use crate::event::{GtpXactId, OGS_DIAM_SUCCESS};
use crate::nas_message::{
    AttachComplete, AttachRequest, AuthenticationResponse, DetachRequestFromUe, EmmStatus,
    EpsMobileIdentity, IdentityResponse, MobileIdentity, NasKeySetIdentifier, ServiceRequest,
};

// ============================================================================
// EMM Handler Result
// ============================================================================

/// Result type for EMM handlers
pub type EmmResult<T> = Result<T, EmmError>;

/// EMM error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmmError {
    #[error("No UE context [{0}]")]
    UeNotFound(MmeUeId),
    #[error("No Session context [{0}]")]
    SessNotFound(MmeSessId),
    #[error("No Bearer context [{0}]")]
    BearerNotFound(MmeBearerId),
    #[error("Missing {0}")]
    MissingPayload(&'static str),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Security failure: {0}")]
    SecurityFailure(String),
    #[error("Diameter failure: Result-Code[{0}]")]
    DiameterFailure(u32),
}

impl EmmError {
    /// Whether the error is a broken caller contract (dangling handle or
    /// missing payload) rather than a procedure outcome
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            EmmError::UeNotFound(_)
                | EmmError::SessNotFound(_)
                | EmmError::BearerNotFound(_)
                | EmmError::MissingPayload(_)
        )
    }
}

// ============================================================================
// Handler Interface
// ============================================================================

/// Procedure handlers of the EMM layer
pub trait EmmHandler {
    fn create_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()>;
    fn delete_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()>;
    fn downlink_data_notification(&mut self, xact: GtpXactId, bearer: &MmeBearer) -> EmmResult<()>;

    /// Authentication-Information-Answer
    fn s6a_aia(&mut self, mme_ue: &mut MmeUe, result_code: u32) -> EmmResult<()>;

    fn attach_request(&mut self, mme_ue: &mut MmeUe, req: &AttachRequest) -> EmmResult<()>;
    fn identity_response(&mut self, mme_ue: &mut MmeUe, rsp: &IdentityResponse) -> EmmResult<()>;
    fn authentication_response(
        &mut self,
        mme_ue: &mut MmeUe,
        rsp: &AuthenticationResponse,
    ) -> EmmResult<()>;
    fn attach_complete(&mut self, mme_ue: &mut MmeUe, msg: &AttachComplete) -> EmmResult<()>;
    fn emm_status(&mut self, mme_ue: &mut MmeUe, msg: &EmmStatus) -> EmmResult<()>;
    fn detach_request(&mut self, mme_ue: &mut MmeUe, req: &DetachRequestFromUe) -> EmmResult<()>;
    fn service_request(&mut self, mme_ue: &mut MmeUe, req: &ServiceRequest) -> EmmResult<()>;
}

fn ksi_of(nas_ksi: &NasKeySetIdentifier) -> NasEpsKsi {
    NasEpsKsi {
        tsc: nas_ksi.tsc,
        ksi: nas_ksi.ksi,
    }
}

/// Default MME procedure handlers
#[derive(Debug, Default)]
pub struct MmeEmmHandler;

impl EmmHandler for MmeEmmHandler {
    fn create_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()> {
        log::debug!("[EMM] Create Session Response [EBI:{}]", bearer.ebi);
        Ok(())
    }

    fn delete_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()> {
        log::debug!("[EMM] Delete Session Response [EBI:{}]", bearer.ebi);
        Ok(())
    }

    fn downlink_data_notification(&mut self, xact: GtpXactId, bearer: &MmeBearer) -> EmmResult<()> {
        log::info!("[EMM] Downlink Data Notification [XACT:{}, EBI:{}]", xact, bearer.ebi);
        Ok(())
    }

    fn s6a_aia(&mut self, mme_ue: &mut MmeUe, result_code: u32) -> EmmResult<()> {
        if result_code != OGS_DIAM_SUCCESS {
            log::warn!(
                "[{}] Authentication-Information failed [{}]",
                mme_ue.imsi_or_dash(),
                result_code
            );
            return Err(EmmError::DiameterFailure(result_code));
        }
        log::debug!("[{}] Authentication-Information-Answer", mme_ue.imsi_or_dash());
        Ok(())
    }

    fn attach_request(&mut self, mme_ue: &mut MmeUe, req: &AttachRequest) -> EmmResult<()> {
        mme_ue.nas_eps.type_ = MmeEpsType::AttachRequest;
        mme_ue.nas_eps.attach_type = req.eps_attach_type;
        mme_ue.nas_eps.ue_ksi = ksi_of(&req.nas_key_set_identifier);
        mme_ue.nas_eps.mme_ksi = mme_ue.nas_eps.ue_ksi;

        match &req.eps_mobile_identity {
            EpsMobileIdentity::Imsi(imsi) => {
                mme_ue.imsi_bcd = imsi.clone();
                log::info!("[{}] Attach request [ATTACH_TYPE:{}]", imsi, req.eps_attach_type);
            }
            EpsMobileIdentity::Guti(guti) => {
                log::info!(
                    "[{}] Attach request with GUTI [MME_GID:{}, MME_CODE:{}, M_TMSI:0x{:x}]",
                    mme_ue.imsi_or_dash(),
                    guti.mme_gid,
                    guti.mme_code,
                    guti.m_tmsi
                );
            }
            EpsMobileIdentity::Imei(imei) => {
                log::warn!("[{}] Attach request with IMEI[{}]", mme_ue.imsi_or_dash(), imei);
            }
        }
        Ok(())
    }

    fn identity_response(&mut self, mme_ue: &mut MmeUe, rsp: &IdentityResponse) -> EmmResult<()> {
        match &rsp.mobile_identity {
            MobileIdentity::Imsi(imsi) => {
                mme_ue.imsi_bcd = imsi.clone();
                log::info!("Identity response: IMSI[{}]", imsi);
            }
            MobileIdentity::Imeisv(imeisv) => {
                mme_ue.imeisv_bcd = imeisv.clone();
                log::info!("Identity response: IMEISV[{}]", imeisv);
            }
            MobileIdentity::Imei(imei) => {
                log::info!("Identity response: IMEI[{}]", imei);
            }
            MobileIdentity::Tmsi(tmsi) => {
                return Err(EmmError::InvalidMessage(format!(
                    "Identity response with TMSI[0x{:x}]",
                    tmsi
                )));
            }
        }
        Ok(())
    }

    fn authentication_response(
        &mut self,
        mme_ue: &mut MmeUe,
        rsp: &AuthenticationResponse,
    ) -> EmmResult<()> {
        let res = &rsp.authentication_response_parameter;
        if res.is_empty() || res.len() != mme_ue.xres_len {
            return Err(EmmError::SecurityFailure(format!(
                "RES length mismatch [{}/{}]",
                res.len(),
                mme_ue.xres_len
            )));
        }

        let xres = &mme_ue.xres[..mme_ue.xres_len];
        if res.as_ref() != xres {
            log::debug!("  RES: {:02x?}", res.as_ref());
            log::debug!("  XRES: {:02x?}", xres);
            return Err(EmmError::SecurityFailure("RES mismatch".to_string()));
        }

        log::info!("Authentication successful for IMSI[{}]", mme_ue.imsi_bcd);
        Ok(())
    }

    fn attach_complete(&mut self, mme_ue: &mut MmeUe, msg: &AttachComplete) -> EmmResult<()> {
        log::info!(
            "Attach complete received for IMSI[{}] [ESM:{} bytes]",
            mme_ue.imsi_bcd,
            msg.esm_message_container.len()
        );
        Ok(())
    }

    fn emm_status(&mut self, mme_ue: &mut MmeUe, msg: &EmmStatus) -> EmmResult<()> {
        log::warn!(
            "[{}] EMM STATUS [Cause:{}]",
            mme_ue.imsi_or_dash(),
            msg.emm_cause
        );
        Ok(())
    }

    fn detach_request(&mut self, mme_ue: &mut MmeUe, req: &DetachRequestFromUe) -> EmmResult<()> {
        mme_ue.nas_eps.type_ = MmeEpsType::DetachRequestFromUe;
        mme_ue.nas_eps.detach_type = req.detach_type;
        mme_ue.nas_eps.ue_ksi = ksi_of(&req.nas_key_set_identifier);

        log::info!(
            "Detach request from IMSI[{}] type[{}] switch_off[{}]",
            mme_ue.imsi_bcd,
            req.detach_type,
            req.switch_off
        );
        Ok(())
    }

    fn service_request(&mut self, mme_ue: &mut MmeUe, req: &ServiceRequest) -> EmmResult<()> {
        mme_ue.nas_eps.type_ = MmeEpsType::ServiceRequest;
        mme_ue.nas_eps.ue_ksi.ksi = req.ksi();

        log::info!(
            "Service request from IMSI[{}] KSI[{}] SEQ[{}]",
            mme_ue.imsi_bcd,
            req.ksi(),
            req.sequence_number()
        );
        Ok(())
    }
}

/// Handler call as seen by [`RecordingHandler`]
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerCall {
    CreateSessionResponse(MmeBearerId),
    DeleteSessionResponse(MmeBearerId),
    DownlinkDataNotification(GtpXactId, MmeBearerId),
    S6aAia(MmeUeId, u32),
    AttachRequest(MmeUeId),
    IdentityResponse(MmeUeId),
    AuthenticationResponse(MmeUeId),
    AttachComplete(MmeUeId),
    EmmStatus(MmeUeId),
    DetachRequest(MmeUeId),
    ServiceRequest(MmeUeId),
}

/// Handler that records calls and changes nothing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub calls: Vec<HandlerCall>,
}

#[cfg(test)]
impl EmmHandler for RecordingHandler {
    fn create_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()> {
        self.calls.push(HandlerCall::CreateSessionResponse(bearer.id));
        Ok(())
    }

    fn delete_session_response(&mut self, bearer: &MmeBearer) -> EmmResult<()> {
        self.calls.push(HandlerCall::DeleteSessionResponse(bearer.id));
        Ok(())
    }

    fn downlink_data_notification(&mut self, xact: GtpXactId, bearer: &MmeBearer) -> EmmResult<()> {
        self.calls.push(HandlerCall::DownlinkDataNotification(xact, bearer.id));
        Ok(())
    }

    fn s6a_aia(&mut self, mme_ue: &mut MmeUe, result_code: u32) -> EmmResult<()> {
        self.calls.push(HandlerCall::S6aAia(mme_ue.id, result_code));
        Ok(())
    }

    fn attach_request(&mut self, mme_ue: &mut MmeUe, _req: &AttachRequest) -> EmmResult<()> {
        self.calls.push(HandlerCall::AttachRequest(mme_ue.id));
        Ok(())
    }

    fn identity_response(&mut self, mme_ue: &mut MmeUe, _rsp: &IdentityResponse) -> EmmResult<()> {
        self.calls.push(HandlerCall::IdentityResponse(mme_ue.id));
        Ok(())
    }

    fn authentication_response(
        &mut self,
        mme_ue: &mut MmeUe,
        _rsp: &AuthenticationResponse,
    ) -> EmmResult<()> {
        self.calls.push(HandlerCall::AuthenticationResponse(mme_ue.id));
        Ok(())
    }

    fn attach_complete(&mut self, mme_ue: &mut MmeUe, _msg: &AttachComplete) -> EmmResult<()> {
        self.calls.push(HandlerCall::AttachComplete(mme_ue.id));
        Ok(())
    }

    fn emm_status(&mut self, mme_ue: &mut MmeUe, _msg: &EmmStatus) -> EmmResult<()> {
        self.calls.push(HandlerCall::EmmStatus(mme_ue.id));
        Ok(())
    }

    fn detach_request(&mut self, mme_ue: &mut MmeUe, _req: &DetachRequestFromUe) -> EmmResult<()> {
        self.calls.push(HandlerCall::DetachRequest(mme_ue.id));
        Ok(())
    }

    fn service_request(&mut self, mme_ue: &mut MmeUe, _req: &ServiceRequest) -> EmmResult<()> {
        self.calls.push(HandlerCall::ServiceRequest(mme_ue.id));
        Ok(())
    }
}
