//! EMM workers
//!
//! Events are sharded over a fixed set of worker tasks by UE so that one
//! UE's events are processed one at a time and in arrival order. Worker `n`
//! owns store partition `n`: it is the only writer of the UEs, sessions and
//! bearers placed there, so workers never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::{MmeStore, MmeUeId, PoolKey};
use crate::emm_handler::EmmHandler;
use crate::emm_sm::EmmSmContext;
use crate::event::{EventQueue, EventTarget, MmeEvent};
use crate::path::{MmePath, OutboundRequest};
use crate::sm::EmmFsm;
use crate::timer::{MmeTimerConfigs, TimerManager};

/// Shared subscriber context store
pub type SharedContext = Arc<MmeStore>;

/// Senders of the shard queues, one per worker
struct ShardQueues(Vec<mpsc::UnboundedSender<MmeEvent>>);

impl ShardQueues {
    fn shard_of<K: PoolKey>(&self, key: K) -> usize {
        key.raw().index() as usize % self.0.len()
    }

    fn send_to(&self, shard: usize, event: MmeEvent) {
        if self.0[shard].send(event).is_err() {
            log::error!("EMM worker {} is gone", shard);
        }
    }
}

impl EventQueue for ShardQueues {
    fn send(&self, event: MmeEvent) {
        match event.target() {
            EventTarget::Ue(mme_ue_id) => self.send_to(self.shard_of(mme_ue_id), event),
            EventTarget::Bearer(bearer_id) => self.send_to(self.shard_of(bearer_id), event),
            EventTarget::None => log::error!("Unroutable event {}", event.name()),
        }
    }
}

/// Entry point for events. Cheap to clone.
#[derive(Clone)]
pub struct EmmDispatcher {
    shards: Arc<ShardQueues>,
    esm: mpsc::UnboundedSender<MmeEvent>,
    context: SharedContext,
}

impl EmmDispatcher {
    /// Creates the dispatcher and one receiver per store partition. UE
    /// removals in the store are reported to the owning shard.
    pub fn new(
        context: SharedContext,
        esm: mpsc::UnboundedSender<MmeEvent>,
    ) -> (Self, Vec<mpsc::UnboundedReceiver<MmeEvent>>) {
        let (shards, receivers): (Vec<_>, Vec<_>) = (0..context.partition_count())
            .map(|_| mpsc::unbounded_channel())
            .unzip();
        let shards = Arc::new(ShardQueues(shards));
        let release: Arc<dyn EventQueue> = shards.clone();
        context.set_release_queue(Arc::downgrade(&release));

        let dispatcher = Self {
            shards,
            esm,
            context,
        };
        (dispatcher, receivers)
    }

    pub fn worker_count(&self) -> usize {
        self.shards.0.len()
    }

    /// Worker owning a UE
    pub fn shard_of(&self, mme_ue_id: MmeUeId) -> usize {
        self.shards.shard_of(mme_ue_id)
    }

    /// Routes an event to the worker of its UE, or to ESM. A bearer handle
    /// names its partition, so no record is looked up here.
    pub fn dispatch(&self, event: MmeEvent) {
        if event.is_esm() {
            if self.esm.send(event).is_err() {
                log::error!("ESM queue closed");
            }
            return;
        }
        self.shards.send(event);
    }
}

impl EventQueue for EmmDispatcher {
    fn send(&self, event: MmeEvent) {
        self.dispatch(event);
    }
}

/// One EMM worker: serial processing of the UEs pinned to its shard
pub struct EmmWorker {
    index: usize,
    context: SharedContext,
    dispatcher: EmmDispatcher,
    handler: Box<dyn EmmHandler + Send>,
    path: MmePath,
    max_paging_retry: u32,
    fsms: HashMap<MmeUeId, EmmFsm>,
}

impl EmmWorker {
    pub fn new(
        index: usize,
        dispatcher: EmmDispatcher,
        handler: Box<dyn EmmHandler + Send>,
        timer_configs: MmeTimerConfigs,
        outbound: mpsc::UnboundedSender<OutboundRequest>,
    ) -> Self {
        let max_paging_retry = timer_configs.t3413.max_count;
        let timers = TimerManager::with_queue(timer_configs, Arc::new(dispatcher.clone()));
        Self {
            index,
            context: dispatcher.context.clone(),
            dispatcher,
            handler,
            path: MmePath::new(timers, outbound),
            max_paging_retry,
            fsms: HashMap::new(),
        }
    }

    pub fn fsm(&self, mme_ue_id: MmeUeId) -> Option<&EmmFsm> {
        self.fsms.get(&mme_ue_id)
    }

    /// Number of UEs with a live state machine
    pub fn fsm_count(&self) -> usize {
        self.fsms.len()
    }

    pub fn path(&self) -> &MmePath {
        &self.path
    }

    /// Drops the state machine and timers of a UE that left the store
    fn release_ue(&mut self, mme_ue_id: MmeUeId) {
        if let Some(mut fsm) = self.fsms.remove(&mme_ue_id) {
            fsm.fini();
        }
        self.path.timers_mut().stop_all_ue_timers(mme_ue_id);
        log::debug!("[worker {}] UE[{}] released", self.index, mme_ue_id);
    }

    /// Processes one event to completion, then forwards the events it
    /// produced
    pub fn handle_event(&mut self, event: MmeEvent) {
        let partition = match event.target() {
            EventTarget::Ue(mme_ue_id) => self.context.partition_of(mme_ue_id),
            EventTarget::Bearer(bearer_id) => self.context.partition_of(bearer_id),
            EventTarget::None => {
                log::error!("[worker {}] {} has no target, dropped", self.index, event.name());
                return;
            }
        };
        if partition != self.index {
            log::warn!(
                "[worker {}] {} belongs to partition {}",
                self.index,
                event.name(),
                partition
            );
        }

        if let MmeEvent::EmmUeRemoved { mme_ue } = event {
            self.release_ue(mme_ue);
            return;
        }

        let (mme_ue_id, removed) = {
            let mut context = self.context.write(partition);

            let owner = match event.target() {
                EventTarget::Ue(mme_ue_id) => Some(mme_ue_id),
                EventTarget::Bearer(bearer_id) => context
                    .bearer_find_by_id(bearer_id)
                    .map(|bearer| bearer.mme_ue_id),
                EventTarget::None => None,
            };
            let Some(mme_ue_id) = owner else {
                log::error!("[worker {}] {} has no UE, dropped", self.index, event.name());
                return;
            };

            let fsm = self.fsms.entry(mme_ue_id).or_insert_with(|| {
                let mut fsm = EmmFsm::new(mme_ue_id);
                fsm.init();
                fsm
            });

            let mut sm = EmmSmContext {
                context: &mut *context,
                handler: self.handler.as_mut(),
                path: &mut self.path,
                max_paging_retry: self.max_paging_retry,
            };
            fsm.dispatch(&mut sm, event);

            (mme_ue_id, context.mme_ue_find_by_id(mme_ue_id).is_none())
        };

        if removed {
            self.release_ue(mme_ue_id);
        }
        for event in self.path.take_outbox() {
            self.dispatcher.dispatch(event);
        }
    }

    /// Processes the shard queue until the task is aborted
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<MmeEvent>) {
        log::debug!("EMM worker {} started", self.index);
        while let Some(event) = rx.recv().await {
            self.handle_event(event);
        }
        log::debug!("EMM worker {} stopped", self.index);
    }
}

/// Spawns one worker per shard receiver
pub fn spawn_workers(
    dispatcher: &EmmDispatcher,
    receivers: Vec<mpsc::UnboundedReceiver<MmeEvent>>,
    timer_configs: &MmeTimerConfigs,
    outbound: &mpsc::UnboundedSender<OutboundRequest>,
    make_handler: impl Fn() -> Box<dyn EmmHandler + Send>,
) -> Vec<JoinHandle<()>> {
    receivers
        .into_iter()
        .enumerate()
        .map(|(index, rx)| {
            let worker = EmmWorker::new(
                index,
                dispatcher.clone(),
                make_handler(),
                timer_configs.clone(),
                outbound.clone(),
            );
            tokio::spawn(worker.run(rx))
        })
        .collect()
}
