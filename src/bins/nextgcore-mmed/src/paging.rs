//! Paging and T3413 retransmission

use crate::context::{MmeUe, PagingType};
use crate::event::MmeTimerId;
use crate::path::EmmPath;

/// Result of a T3413 expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingOutcome {
    /// Paging was sent again; carries the retry count after the increment
    Retransmitted(u32),
    /// Retry bound reached, paging abandoned
    Failed,
    /// No paging ongoing, the expiry is stale
    Idle,
}

fn send_paging(mme_ue: &mut MmeUe, path: &mut dyn EmmPath) {
    if let Some(pkbuf) = path.s1ap_send_paging(mme_ue) {
        mme_ue.t3413.pkbuf = Some(pkbuf);
    }
    path.timer_start(mme_ue.id, MmeTimerId::T3413);
}

/// Starts paging the UE and arms T3413.
///
/// A request while paging is already ongoing pages again without resetting
/// the retry count.
pub fn mme_ue_paging_start(mme_ue: &mut MmeUe, path: &mut dyn EmmPath, type_: PagingType) {
    if !mme_ue.paging.ongoing {
        mme_ue.t3413.retry_count = 0;
    }
    mme_ue.paging.type_ = type_;
    mme_ue.paging.ongoing = true;
    send_paging(mme_ue, path);
}

/// The UE showed up. Ends any ongoing paging.
pub fn mme_ue_paged(mme_ue: &mut MmeUe, path: &mut dyn EmmPath) {
    if mme_ue.paging.ongoing {
        log::debug!("[{}] Paging done", mme_ue.imsi_or_dash());
        path.timer_stop(mme_ue.id, MmeTimerId::T3413);
    }
    mme_ue.paging.ongoing = false;
    mme_ue.t3413.retry_count = 0;
    mme_ue.t3413.pkbuf = None;
}

/// Handles T3413 expiry. An expiry that races with the end of paging is
/// ignored.
pub fn mme_ue_t3413_expire(
    mme_ue: &mut MmeUe,
    path: &mut dyn EmmPath,
    max_retry: u32,
) -> PagingOutcome {
    if !mme_ue.paging.ongoing {
        log::debug!("[{}] T3413 expired while not paging", mme_ue.imsi_or_dash());
        return PagingOutcome::Idle;
    }

    if mme_ue.t3413.retry_count >= max_retry {
        log::warn!("[{}] Paging failed. Stop paging", mme_ue.imsi_or_dash());
        mme_ue.t3413.pkbuf = None;
        mme_ue.paging.ongoing = false;
        return PagingOutcome::Failed;
    }

    mme_ue.t3413.retry_count += 1;
    log::debug!(
        "[{}] Paging retransmission [{}/{}]",
        mme_ue.imsi_or_dash(),
        mme_ue.t3413.retry_count,
        max_retry
    );
    send_paging(mme_ue, path);
    PagingOutcome::Retransmitted(mme_ue.t3413.retry_count)
}
