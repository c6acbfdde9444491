//! EMM collaborator path
//!
//! Everything the EMM state machine hands to other layers: event
//! enqueueing, timers, S1AP paging, the S6a Update-Location-Request and
//! KeNB derivation.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::context::{MmeUe, MmeUeId, OGS_SHA256_DIGEST_SIZE};
use crate::event::{MmeEvent, MmeTimerId};
use crate::kdf;
use crate::timer::TimerManager;

/// Outbound collaborator interface of the EMM state machine.
///
/// None of these calls block; the work is queued to the owning layer.
pub trait EmmPath {
    /// Enqueues an event, preserving order per caller
    fn send_event(&mut self, event: MmeEvent);

    /// Arms a UE timer, replacing an armed instance
    fn timer_start(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId);

    fn timer_stop(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId);

    /// Sends S1AP Paging for the UE. Returns the PDU if the S1AP path
    /// leaves it with the caller for retransmission.
    fn s1ap_send_paging(&mut self, mme_ue: &MmeUe) -> Option<Bytes>;

    /// Sends an S6a Update-Location-Request for the UE
    fn s6a_send_ulr(&mut self, mme_ue: &MmeUe);

    fn kdf_enb(
        &self,
        kasme: &[u8; OGS_SHA256_DIGEST_SIZE],
        ul_count: u32,
    ) -> [u8; OGS_SHA256_DIGEST_SIZE] {
        kdf::mme_kdf_enb(kasme, ul_count)
    }
}

/// Request for the S1AP or S6a layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    S1apPaging { mme_ue: MmeUeId, imsi_bcd: String },
    S6aUpdateLocation { mme_ue: MmeUeId, imsi_bcd: String },
}

/// Path of one EMM worker.
///
/// Events are held in an outbox until the worker has released the context
/// store; requests for S1AP/S6a go to the outbound channel.
pub struct MmePath {
    outbox: Vec<MmeEvent>,
    timers: TimerManager,
    outbound: mpsc::UnboundedSender<OutboundRequest>,
}

impl MmePath {
    pub fn new(timers: TimerManager, outbound: mpsc::UnboundedSender<OutboundRequest>) -> Self {
        Self {
            outbox: Vec::new(),
            timers,
            outbound,
        }
    }

    /// Events enqueued since the last call, in order
    pub fn take_outbox(&mut self) -> Vec<MmeEvent> {
        std::mem::take(&mut self.outbox)
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    pub fn timers_mut(&mut self) -> &mut TimerManager {
        &mut self.timers
    }

    fn send_outbound(&self, request: OutboundRequest) {
        if let Err(e) = self.outbound.send(request) {
            log::error!("Outbound channel closed, dropping {:?}", e.0);
        }
    }
}

impl EmmPath for MmePath {
    fn send_event(&mut self, event: MmeEvent) {
        self.outbox.push(event);
    }

    fn timer_start(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId) {
        self.timers.start_ue_timer(timer_id, mme_ue_id);
    }

    fn timer_stop(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId) {
        self.timers.stop_ue_timer(timer_id, mme_ue_id);
    }

    /// The S1AP layer encodes the PDU and keeps it for retransmission, so
    /// the daemon never buffers one in `t3413.pkbuf`. Each T3413
    /// retransmission posts a fresh paging request instead.
    fn s1ap_send_paging(&mut self, mme_ue: &MmeUe) -> Option<Bytes> {
        self.send_outbound(OutboundRequest::S1apPaging {
            mme_ue: mme_ue.id,
            imsi_bcd: mme_ue.imsi_bcd.clone(),
        });
        None
    }

    fn s6a_send_ulr(&mut self, mme_ue: &MmeUe) {
        self.send_outbound(OutboundRequest::S6aUpdateLocation {
            mme_ue: mme_ue.id,
            imsi_bcd: mme_ue.imsi_bcd.clone(),
        });
    }
}

/// Path that records every call
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingPath {
    pub events: Vec<MmeEvent>,
    pub timer_starts: Vec<(MmeUeId, MmeTimerId)>,
    pub timer_stops: Vec<(MmeUeId, MmeTimerId)>,
    pub pagings: Vec<MmeUeId>,
    pub ulrs: Vec<MmeUeId>,
    pub kdf_calls: std::cell::Cell<usize>,
    /// Returned by `s1ap_send_paging`
    pub paging_pdu: Option<Bytes>,
}

#[cfg(test)]
impl RecordingPath {
    pub fn is_silent(&self) -> bool {
        self.events.is_empty()
            && self.timer_starts.is_empty()
            && self.timer_stops.is_empty()
            && self.pagings.is_empty()
            && self.ulrs.is_empty()
            && self.kdf_calls.get() == 0
    }
}

#[cfg(test)]
impl EmmPath for RecordingPath {
    fn send_event(&mut self, event: MmeEvent) {
        self.events.push(event);
    }

    fn timer_start(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId) {
        self.timer_starts.push((mme_ue_id, timer_id));
    }

    fn timer_stop(&mut self, mme_ue_id: MmeUeId, timer_id: MmeTimerId) {
        self.timer_stops.push((mme_ue_id, timer_id));
    }

    fn s1ap_send_paging(&mut self, mme_ue: &MmeUe) -> Option<Bytes> {
        self.pagings.push(mme_ue.id);
        self.paging_pdu.clone()
    }

    fn s6a_send_ulr(&mut self, mme_ue: &MmeUe) {
        self.ulrs.push(mme_ue.id);
    }

    fn kdf_enb(
        &self,
        kasme: &[u8; OGS_SHA256_DIGEST_SIZE],
        ul_count: u32,
    ) -> [u8; OGS_SHA256_DIGEST_SIZE] {
        self.kdf_calls.set(self.kdf_calls.get() + 1);
        kdf::mme_kdf_enb(kasme, ul_count)
    }
}
