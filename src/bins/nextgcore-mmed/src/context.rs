//! MME Context Management
//!
//! UE, session and bearer records held in generation-checked pools.
//! Records refer to each other through pool handles only.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use bytes::Bytes;

use crate::event::{EventQueue, MmeEvent};
use crate::nas_message::NasMessage;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of sessions per UE
pub const OGS_MAX_NUM_OF_SESS: usize = 4;
/// Maximum number of bearers per session
pub const OGS_MAX_NUM_OF_BEARER: usize = 8;
/// MAX RES length
pub const OGS_MAX_RES_LEN: usize = 16;
/// SHA256 digest size
pub const OGS_SHA256_DIGEST_SIZE: usize = 32;
/// NAS KSI no key available
pub const OGS_NAS_KSI_NO_KEY_IS_AVAILABLE: u8 = 7;
/// Minimum EPS bearer ID
pub const MIN_EPS_BEARER_ID: u8 = 5;
/// Maximum EPS bearer ID
pub const MAX_EPS_BEARER_ID: u8 = 15;

// ============================================================================
// Pool
// ============================================================================

/// Raw pool handle.
///
/// A slot index plus the generation the slot had when the record was
/// allocated. Removing a record bumps the slot generation, so a handle kept
/// past removal never resolves to whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId {
    index: u32,
    generation: u32,
}

impl PoolId {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Typed wrapper over a [`PoolId`]
pub trait PoolKey: Copy {
    fn from_raw(raw: PoolId) -> Self;
    fn raw(self) -> PoolId;
}

macro_rules! pool_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(PoolId);

        impl PoolKey for $name {
            fn from_raw(raw: PoolId) -> Self {
                Self(raw)
            }

            fn raw(self) -> PoolId {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

pool_key!(
    /// Handle of an [`MmeUe`]
    MmeUeId
);
pool_key!(
    /// Handle of an [`MmeSess`]
    MmeSessId
);
pool_key!(
    /// Handle of an [`MmeBearer`]
    MmeBearerId
);

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Fixed-capacity pool with generation-checked handles
#[derive(Debug)]
pub struct Pool<K: PoolKey, T> {
    slots: Vec<Slot<T>>,
    /// Free slot numbers
    free: Vec<u32>,
    capacity: usize,
    len: usize,
    /// Slot `n` is exposed as handle index `n * stride + offset`
    stride: u32,
    offset: u32,
    _key: PhantomData<K>,
}

impl<K: PoolKey, T> Pool<K, T> {
    pub fn new(capacity: usize) -> Self {
        Self::with_stride(capacity, 1, 0)
    }

    /// Pool whose handle indexes are all congruent to `offset` modulo
    /// `stride`. Pools built with the same stride and distinct offsets never
    /// hand out the same index.
    pub fn with_stride(capacity: usize, stride: u32, offset: u32) -> Self {
        let stride = stride.max(1);
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            len: 0,
            stride,
            offset: offset % stride,
            _key: PhantomData,
        }
    }

    fn slot_of(&self, raw: PoolId) -> Option<usize> {
        let index = raw.index.checked_sub(self.offset)?;
        (index % self.stride == 0).then_some((index / self.stride) as usize)
    }

    /// Allocates a slot and builds the record with its own handle.
    /// Returns `None` when the pool is exhausted.
    pub fn alloc_with(&mut self, build: impl FnOnce(K) -> T) -> Option<K> {
        let slot_no = match self.free.pop() {
            Some(slot_no) => slot_no,
            None => {
                if self.slots.len() >= self.capacity {
                    return None;
                }
                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let index = slot_no * self.stride + self.offset;
        let slot = &mut self.slots[slot_no as usize];
        let key = K::from_raw(PoolId::new(index, slot.generation));
        slot.value = Some(build(key));
        self.len += 1;
        Some(key)
    }

    pub fn free(&mut self, key: K) -> Option<T> {
        let raw = key.raw();
        let slot_no = self.slot_of(raw)?;
        let slot = self.slots.get_mut(slot_no)?;
        if slot.generation != raw.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(slot_no as u32);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        let raw = key.raw();
        self.slots
            .get(self.slot_of(raw)?)
            .filter(|slot| slot.generation == raw.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let raw = key.raw();
        let slot_no = self.slot_of(raw)?;
        self.slots
            .get_mut(slot_no)
            .filter(|slot| slot.generation == raw.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// UE Context Types
// ============================================================================

/// EPS procedure the UE is in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmeEpsType {
    #[default]
    None,
    AttachRequest,
    ServiceRequest,
    DetachRequestFromUe,
}

/// Paging type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PagingType {
    #[default]
    None,
    DownlinkDataNotification,
}

/// NAS EPS KSI info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NasEpsKsi {
    /// TSC (Type of Security Context)
    pub tsc: u8,
    /// KSI (Key Set Identifier)
    pub ksi: u8,
}

/// NAS EPS info
#[derive(Debug, Clone, Default)]
pub struct NasEpsInfo {
    /// EPS type
    pub type_: MmeEpsType,
    /// MME KSI
    pub mme_ksi: NasEpsKsi,
    /// UE KSI
    pub ue_ksi: NasEpsKsi,
    /// Attach type
    pub attach_type: u8,
    /// Detach type
    pub detach_type: u8,
}

/// Paging info
#[derive(Debug, Clone, Default)]
pub struct PagingInfo {
    /// Paging type
    pub type_: PagingType,
    /// Paging in progress
    pub ongoing: bool,
}

/// Retransmission bookkeeping of a NAS/S1AP timer
#[derive(Debug, Clone, Default)]
pub struct TimerWithRetry {
    /// Retry count
    pub retry_count: u32,
    /// Buffered packet, retransmitted on expiry
    pub pkbuf: Option<Bytes>,
}

/// MME UE context
#[derive(Debug, Clone)]
pub struct MmeUe {
    /// Pool handle
    pub id: MmeUeId,
    /// NAS EPS info
    pub nas_eps: NasEpsInfo,

    /// IMSI BCD string
    pub imsi_bcd: String,
    /// IMEISV BCD string
    pub imeisv_bcd: String,

    /// Security context is valid
    pub security_context_available: bool,
    /// Expected response
    pub xres: [u8; OGS_MAX_RES_LEN],
    /// XRES length
    pub xres_len: usize,
    /// KASME
    pub kasme: [u8; OGS_SHA256_DIGEST_SIZE],
    /// KeNB
    pub kenb: [u8; OGS_SHA256_DIGEST_SIZE],
    /// Uplink NAS COUNT
    pub ul_count: u32,

    /// Last EMM message received from the UE
    pub last_emm_message: Option<NasMessage>,

    pub paging: PagingInfo,
    pub t3413: TimerWithRetry,

    /// Sessions in creation order
    pub sess_list: Vec<MmeSessId>,
}

impl MmeUe {
    fn new(id: MmeUeId) -> Self {
        Self {
            id,
            nas_eps: NasEpsInfo {
                mme_ksi: NasEpsKsi {
                    tsc: 0,
                    ksi: OGS_NAS_KSI_NO_KEY_IS_AVAILABLE,
                },
                ue_ksi: NasEpsKsi {
                    tsc: 0,
                    ksi: OGS_NAS_KSI_NO_KEY_IS_AVAILABLE,
                },
                ..Default::default()
            },
            imsi_bcd: String::new(),
            imeisv_bcd: String::new(),
            security_context_available: false,
            xres: [0; OGS_MAX_RES_LEN],
            xres_len: 0,
            kasme: [0; OGS_SHA256_DIGEST_SIZE],
            kenb: [0; OGS_SHA256_DIGEST_SIZE],
            ul_count: 0,
            last_emm_message: None,
            paging: PagingInfo::default(),
            t3413: TimerWithRetry::default(),
            sess_list: Vec::new(),
        }
    }

    /// IMSI for log lines, `-` while unknown
    pub fn imsi_or_dash(&self) -> &str {
        if self.imsi_bcd.is_empty() {
            "-"
        } else {
            &self.imsi_bcd
        }
    }
}

/// MME session (PDN connection)
#[derive(Debug, Clone)]
pub struct MmeSess {
    pub id: MmeSessId,
    /// Owning UE
    pub mme_ue_id: MmeUeId,
    /// Procedure transaction identity
    pub pti: u8,
    /// Bearers in creation order
    pub bearer_list: Vec<MmeBearerId>,
}

/// MME bearer
#[derive(Debug, Clone)]
pub struct MmeBearer {
    pub id: MmeBearerId,
    /// EPS bearer identity
    pub ebi: u8,
    /// Owning UE
    pub mme_ue_id: MmeUeId,
    /// Owning session
    pub sess_id: MmeSessId,
}

// ============================================================================
// MME Context
// ============================================================================

/// Subscriber context store
#[derive(Debug)]
pub struct MmeContext {
    mme_ue_pool: Pool<MmeUeId, MmeUe>,
    sess_pool: Pool<MmeSessId, MmeSess>,
    bearer_pool: Pool<MmeBearerId, MmeBearer>,
}

impl Default for MmeContext {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl MmeContext {
    /// Creates a store sized for `max_ue` subscribers
    pub fn new(max_ue: usize) -> Self {
        Self::partition(max_ue, 1, 0)
    }

    /// Creates partition `offset` of `stride` partitions. Every handle it
    /// hands out has an index congruent to `offset` modulo `stride`.
    pub fn partition(max_ue: usize, stride: u32, offset: u32) -> Self {
        let max_sess = max_ue * OGS_MAX_NUM_OF_SESS;
        let max_bearer = max_sess * OGS_MAX_NUM_OF_BEARER;
        Self {
            mme_ue_pool: Pool::with_stride(max_ue, stride, offset),
            sess_pool: Pool::with_stride(max_sess, stride, offset),
            bearer_pool: Pool::with_stride(max_bearer, stride, offset),
        }
    }

    // UE ---------------------------------------------------------------------

    pub fn mme_ue_add(&mut self) -> Option<MmeUeId> {
        let id = self.mme_ue_pool.alloc_with(MmeUe::new);
        match id {
            Some(id) => log::debug!(
                "[Added] Number of MME-UEs is now {} ({})",
                self.mme_ue_pool.len(),
                id
            ),
            None => log::error!(
                "mme_ue_add() failed: pool exhausted ({})",
                self.mme_ue_pool.capacity()
            ),
        }
        id
    }

    /// Removes the UE together with all of its sessions and bearers
    pub fn mme_ue_remove(&mut self, id: MmeUeId) -> bool {
        let Some(mme_ue) = self.mme_ue_pool.free(id) else {
            return false;
        };
        for sess_id in mme_ue.sess_list {
            self.sess_free(sess_id);
        }
        log::debug!("[Removed] Number of MME-UEs is now {}", self.mme_ue_pool.len());
        true
    }

    pub fn mme_ue_find_by_id(&self, id: MmeUeId) -> Option<&MmeUe> {
        self.mme_ue_pool.get(id)
    }

    pub fn mme_ue_find_by_id_mut(&mut self, id: MmeUeId) -> Option<&mut MmeUe> {
        self.mme_ue_pool.get_mut(id)
    }

    pub fn mme_ue_count(&self) -> usize {
        self.mme_ue_pool.len()
    }

    pub fn mme_ue_capacity(&self) -> usize {
        self.mme_ue_pool.capacity()
    }

    // Session ----------------------------------------------------------------

    /// Adds a session to the end of the UE's session list
    pub fn sess_add(&mut self, mme_ue_id: MmeUeId, pti: u8) -> Option<MmeSessId> {
        if self.mme_ue_pool.get(mme_ue_id)?.sess_list.len() >= OGS_MAX_NUM_OF_SESS {
            log::error!("sess_add() failed: too many sessions for UE {}", mme_ue_id);
            return None;
        }
        let sess_id = self.sess_pool.alloc_with(|id| MmeSess {
            id,
            mme_ue_id,
            pti,
            bearer_list: Vec::new(),
        })?;
        self.mme_ue_pool.get_mut(mme_ue_id)?.sess_list.push(sess_id);
        Some(sess_id)
    }

    pub fn sess_remove(&mut self, id: MmeSessId) -> bool {
        let Some(sess) = self.sess_pool.get(id) else {
            return false;
        };
        let mme_ue_id = sess.mme_ue_id;
        if let Some(mme_ue) = self.mme_ue_pool.get_mut(mme_ue_id) {
            mme_ue.sess_list.retain(|s| *s != id);
        }
        self.sess_free(id)
    }

    fn sess_free(&mut self, id: MmeSessId) -> bool {
        let Some(sess) = self.sess_pool.free(id) else {
            return false;
        };
        for bearer_id in sess.bearer_list {
            self.bearer_pool.free(bearer_id);
        }
        true
    }

    pub fn sess_find_by_id(&self, id: MmeSessId) -> Option<&MmeSess> {
        self.sess_pool.get(id)
    }

    pub fn sess_find_by_id_mut(&mut self, id: MmeSessId) -> Option<&mut MmeSess> {
        self.sess_pool.get_mut(id)
    }

    pub fn sess_count(&self) -> usize {
        self.sess_pool.len()
    }

    // Bearer -----------------------------------------------------------------

    /// Adds a bearer to the end of the session's bearer list.
    /// The EBI is the lowest one not yet used by the UE.
    pub fn bearer_add(&mut self, sess_id: MmeSessId) -> Option<MmeBearerId> {
        let sess = self.sess_pool.get(sess_id)?;
        let mme_ue_id = sess.mme_ue_id;
        if sess.bearer_list.len() >= OGS_MAX_NUM_OF_BEARER {
            log::error!("bearer_add() failed: too many bearers in session {}", sess_id);
            return None;
        }
        let ebi = self.next_ebi(mme_ue_id)?;

        let bearer_id = self.bearer_pool.alloc_with(|id| MmeBearer {
            id,
            ebi,
            mme_ue_id,
            sess_id,
        })?;
        self.sess_pool.get_mut(sess_id)?.bearer_list.push(bearer_id);
        Some(bearer_id)
    }

    fn next_ebi(&self, mme_ue_id: MmeUeId) -> Option<u8> {
        let mme_ue = self.mme_ue_pool.get(mme_ue_id)?;
        let used: Vec<u8> = mme_ue
            .sess_list
            .iter()
            .filter_map(|s| self.sess_pool.get(*s))
            .flat_map(|sess| sess.bearer_list.iter())
            .filter_map(|b| self.bearer_pool.get(*b))
            .map(|bearer| bearer.ebi)
            .collect();
        let ebi = (MIN_EPS_BEARER_ID..=MAX_EPS_BEARER_ID).find(|ebi| !used.contains(ebi));
        if ebi.is_none() {
            log::error!("No EBI left for UE {}", mme_ue_id);
        }
        ebi
    }

    pub fn bearer_remove(&mut self, id: MmeBearerId) -> bool {
        let Some(bearer) = self.bearer_pool.free(id) else {
            return false;
        };
        if let Some(sess) = self.sess_pool.get_mut(bearer.sess_id) {
            sess.bearer_list.retain(|b| *b != id);
        }
        true
    }

    pub fn bearer_find_by_id(&self, id: MmeBearerId) -> Option<&MmeBearer> {
        self.bearer_pool.get(id)
    }

    pub fn bearer_find_by_id_mut(&mut self, id: MmeBearerId) -> Option<&mut MmeBearer> {
        self.bearer_pool.get_mut(id)
    }

    pub fn bearer_count(&self) -> usize {
        self.bearer_pool.len()
    }
}

// ============================================================================
// Partitioned Store
// ============================================================================

/// Subscriber store split into independently locked partitions, one per
/// EMM worker.
///
/// A UE and all of its sessions and bearers live in one partition, and the
/// index of every handle is congruent to its partition modulo the partition
/// count, so a handle alone names the lock to take.
pub struct MmeStore {
    partitions: Vec<RwLock<MmeContext>>,
    next: AtomicUsize,
    /// Receives `EmmUeRemoved` for every removed UE
    release: OnceLock<Weak<dyn EventQueue>>,
}

impl MmeStore {
    /// Creates `partitions` partitions sharing `max_ue` UE slots
    pub fn new(max_ue: usize, partitions: usize) -> Self {
        let count = partitions.max(1);
        let partitions = (0..count)
            .map(|p| {
                let max = max_ue / count + usize::from(p < max_ue % count);
                RwLock::new(MmeContext::partition(max, count as u32, p as u32))
            })
            .collect();
        Self {
            partitions,
            next: AtomicUsize::new(0),
            release: OnceLock::new(),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition holding the record behind `key`
    pub fn partition_of<K: PoolKey>(&self, key: K) -> usize {
        key.raw().index() as usize % self.partitions.len()
    }

    pub fn read(&self, partition: usize) -> RwLockReadGuard<'_, MmeContext> {
        self.partitions[partition]
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self, partition: usize) -> RwLockWriteGuard<'_, MmeContext> {
        self.partitions[partition]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers the queue told about removed UEs. Only the first call
    /// takes effect.
    pub fn set_release_queue(&self, queue: Weak<dyn EventQueue>) {
        if self.release.set(queue).is_err() {
            log::warn!("UE release queue already set");
        }
    }

    /// Adds a UE to the next partition with room, round robin
    pub fn mme_ue_add(&self) -> Option<MmeUeId> {
        let count = self.partitions.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for i in 0..count {
            let mut context = self.write((start + i) % count);
            if context.mme_ue_count() < context.mme_ue_capacity() {
                return context.mme_ue_add();
            }
        }
        log::error!("mme_ue_add() failed: all {} partitions full", count);
        None
    }

    /// Removes the UE with its sessions and bearers, then tells the release
    /// queue so the owning worker can drop its per-UE state
    pub fn mme_ue_remove(&self, id: MmeUeId) -> bool {
        let removed = self.write(self.partition_of(id)).mme_ue_remove(id);
        if removed {
            match self.release.get().and_then(Weak::upgrade) {
                Some(queue) => queue.send(MmeEvent::EmmUeRemoved { mme_ue: id }),
                None => log::debug!("No release queue for UE[{}]", id),
            }
        }
        removed
    }

    pub fn mme_ue_count(&self) -> usize {
        (0..self.partitions.len())
            .map(|p| self.read(p).mme_ue_count())
            .sum()
    }

    pub fn sess_add(&self, mme_ue_id: MmeUeId, pti: u8) -> Option<MmeSessId> {
        self.write(self.partition_of(mme_ue_id)).sess_add(mme_ue_id, pti)
    }

    pub fn sess_remove(&self, id: MmeSessId) -> bool {
        self.write(self.partition_of(id)).sess_remove(id)
    }

    pub fn bearer_add(&self, sess_id: MmeSessId) -> Option<MmeBearerId> {
        self.write(self.partition_of(sess_id)).bearer_add(sess_id)
    }

    pub fn bearer_remove(&self, id: MmeBearerId) -> bool {
        self.write(self.partition_of(id)).bearer_remove(id)
    }
}
