//! Decoded EMM messages
//!
//! Uplink NAS EMM messages as delivered to the EMM state machine. Wire
//! decoding happens in the NAS path; these are the decoded forms.

use std::fmt;

use bytes::Bytes;

// ============================================================================
// NAS EPS Message Types
// ============================================================================

/// NAS EPS message types (TS 24.301 9.8)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NasEpsMessageType {
    AttachRequest = 0x41,
    AttachComplete = 0x43,
    DetachRequest = 0x45,
    TauRequest = 0x48,
    ServiceRequest = 0x4d,
    AuthenticationResponse = 0x53,
    IdentityResponse = 0x56,
    SecurityModeComplete = 0x5e,
    EmmStatus = 0x60,
}

// ============================================================================
// Security Header Types
// ============================================================================

/// NAS Security Header Types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SecurityHeaderType {
    /// Plain NAS message
    #[default]
    PlainNas = 0,
    /// Integrity protected
    IntegrityProtected = 1,
    /// Integrity protected and ciphered
    IntegrityProtectedAndCiphered = 2,
    /// Integrity protected with new EPS security context
    IntegrityProtectedNewContext = 3,
    /// Integrity protected and ciphered with new EPS security context
    IntegrityProtectedAndCipheredNewContext = 4,
    /// Security header for the SERVICE REQUEST message
    ServiceRequest = 12,
}

impl SecurityHeaderType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::PlainNas),
            1 => Some(Self::IntegrityProtected),
            2 => Some(Self::IntegrityProtectedAndCiphered),
            3 => Some(Self::IntegrityProtectedNewContext),
            4 => Some(Self::IntegrityProtectedAndCipheredNewContext),
            12 => Some(Self::ServiceRequest),
            _ => None,
        }
    }
}

// ============================================================================
// Information Elements
// ============================================================================

/// NAS key set identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NasKeySetIdentifier {
    pub tsc: u8,
    pub ksi: u8,
}

/// EPS GUTI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpsGuti {
    pub plmn_id: [u8; 3],
    pub mme_gid: u16,
    pub mme_code: u8,
    pub m_tmsi: u32,
}

/// EPS mobile identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpsMobileIdentity {
    Imsi(String),
    Guti(EpsGuti),
    Imei(String),
}

/// Mobile identity (identity response)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MobileIdentity {
    Imsi(String),
    Imei(String),
    Imeisv(String),
    Tmsi(u32),
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub eps_attach_type: u8,
    pub nas_key_set_identifier: NasKeySetIdentifier,
    pub eps_mobile_identity: EpsMobileIdentity,
    pub esm_message_container: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityResponse {
    pub mobile_identity: MobileIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationResponse {
    pub authentication_response_parameter: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SecurityModeComplete {
    pub imeisv: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachComplete {
    pub esm_message_container: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmmStatus {
    pub emm_cause: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachRequestFromUe {
    pub detach_type: u8,
    pub switch_off: bool,
    pub nas_key_set_identifier: NasKeySetIdentifier,
    pub eps_mobile_identity: EpsMobileIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingAreaUpdateRequest {
    pub eps_update_type: u8,
    pub active_flag: bool,
    pub nas_key_set_identifier: NasKeySetIdentifier,
    pub old_guti: EpsMobileIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceRequest {
    /// KSI (3 bits) and sequence number (5 bits)
    pub ksi_and_sequence_number: u8,
    pub short_mac: u16,
}

impl ServiceRequest {
    pub fn ksi(&self) -> u8 {
        (self.ksi_and_sequence_number >> 5) & 0x07
    }

    pub fn sequence_number(&self) -> u8 {
        self.ksi_and_sequence_number & 0x1f
    }
}

/// Decoded uplink EMM message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmmMessage {
    AttachRequest(AttachRequest),
    IdentityResponse(IdentityResponse),
    AuthenticationResponse(AuthenticationResponse),
    SecurityModeComplete(SecurityModeComplete),
    AttachComplete(AttachComplete),
    EmmStatus(EmmStatus),
    DetachRequest(DetachRequestFromUe),
    TrackingAreaUpdateRequest(TrackingAreaUpdateRequest),
    ServiceRequest(ServiceRequest),
    /// Any message the MME does not decode further
    Other { message_type: u8 },
}

impl EmmMessage {
    pub fn message_type(&self) -> u8 {
        let t = match self {
            EmmMessage::AttachRequest(_) => NasEpsMessageType::AttachRequest,
            EmmMessage::IdentityResponse(_) => NasEpsMessageType::IdentityResponse,
            EmmMessage::AuthenticationResponse(_) => NasEpsMessageType::AuthenticationResponse,
            EmmMessage::SecurityModeComplete(_) => NasEpsMessageType::SecurityModeComplete,
            EmmMessage::AttachComplete(_) => NasEpsMessageType::AttachComplete,
            EmmMessage::EmmStatus(_) => NasEpsMessageType::EmmStatus,
            EmmMessage::DetachRequest(_) => NasEpsMessageType::DetachRequest,
            EmmMessage::TrackingAreaUpdateRequest(_) => NasEpsMessageType::TauRequest,
            EmmMessage::ServiceRequest(_) => NasEpsMessageType::ServiceRequest,
            EmmMessage::Other { message_type } => return *message_type,
        };
        t as u8
    }
}

/// Uplink NAS EMM message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasMessage {
    pub security_header_type: SecurityHeaderType,
    pub emm: EmmMessage,
}

impl NasMessage {
    pub fn plain(emm: EmmMessage) -> Self {
        Self {
            security_header_type: SecurityHeaderType::PlainNas,
            emm,
        }
    }

    pub fn protected(security_header_type: SecurityHeaderType, emm: EmmMessage) -> Self {
        Self {
            security_header_type,
            emm,
        }
    }

    /// SERVICE REQUEST, which carries its own security header type
    pub fn service_request(service_request: ServiceRequest) -> Self {
        Self {
            security_header_type: SecurityHeaderType::ServiceRequest,
            emm: EmmMessage::ServiceRequest(service_request),
        }
    }

    pub fn message_type(&self) -> u8 {
        self.emm.message_type()
    }
}

impl fmt::Display for NasMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type:0x{:02x} sh:{}",
            self.message_type(),
            self.security_header_type as u8
        )
    }
}
