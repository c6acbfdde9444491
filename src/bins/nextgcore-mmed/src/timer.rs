//! MME Timer Management
//!
//! Timer configuration and the per-UE timer service. Every armed timer is a
//! tokio task that posts the expiry event back to the owning worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::context::MmeUeId;
use crate::event::{EventQueue, MmeEvent, MmeTimerId};

// ============================================================================
// Timer Configuration
// ============================================================================

/// Timer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    /// Timer is configured
    pub enabled: bool,
    /// Maximum retry count
    pub max_count: u32,
    /// Timer duration
    pub duration: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_count: 0,
            duration: Duration::ZERO,
        }
    }
}

impl TimerConfig {
    pub fn new(max_count: u32, duration: Duration) -> Self {
        Self {
            enabled: true,
            max_count,
            duration,
        }
    }
}

/// MME timer configurations. Only timers the EMM core arms are configured.
#[derive(Debug, Clone)]
pub struct MmeTimerConfigs {
    /// T3413 - Paging procedure for EPS services initiated
    pub t3413: TimerConfig,
}

impl Default for MmeTimerConfigs {
    fn default() -> Self {
        Self {
            t3413: TimerConfig::new(2, Duration::from_secs(2)),
        }
    }
}

impl MmeTimerConfigs {
    pub fn get(&self, timer_id: MmeTimerId) -> Option<&TimerConfig> {
        match timer_id {
            MmeTimerId::T3413 => Some(&self.t3413),
            _ => None,
        }
    }
}

// ============================================================================
// Timer Instance
// ============================================================================

/// Armed timer. Dropping the instance cancels its task.
struct TimerInstance {
    timer_id: MmeTimerId,
    /// Arming sequence number, tells a re-armed timer from the old one
    seq: u64,
    /// `None` when armed outside a tokio runtime
    handle: Option<JoinHandle<()>>,
}

impl Drop for TimerInstance {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

type TimerMap = HashMap<(MmeUeId, MmeTimerId), TimerInstance>;

fn lock_timers(timers: &Mutex<TimerMap>) -> MutexGuard<'_, TimerMap> {
    timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Timer Manager
// ============================================================================

/// Timer service of one EMM worker.
///
/// An expired timer leaves the armed set before its event is posted.
pub struct TimerManager {
    pub configs: MmeTimerConfigs,
    active_timers: Arc<Mutex<TimerMap>>,
    next_seq: u64,
    queue: Option<Arc<dyn EventQueue>>,
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new(MmeTimerConfigs::default())
    }
}

impl TimerManager {
    /// Timer manager that only records armed timers
    pub fn new(configs: MmeTimerConfigs) -> Self {
        Self {
            configs,
            active_timers: Arc::new(Mutex::new(HashMap::new())),
            next_seq: 0,
            queue: None,
        }
    }

    /// Timer manager posting expiry events to `queue`
    pub fn with_queue(configs: MmeTimerConfigs, queue: Arc<dyn EventQueue>) -> Self {
        Self {
            queue: Some(queue),
            ..Self::new(configs)
        }
    }

    /// Arms a UE timer. An already armed instance of the same timer is
    /// cancelled first.
    pub fn start_ue_timer(&mut self, timer_id: MmeTimerId, mme_ue_id: MmeUeId) -> bool {
        let Some(config) = self.configs.get(timer_id) else {
            log::warn!("Timer {} is not configured", timer_id);
            return false;
        };
        if !config.enabled {
            log::warn!("Timer {} is not enabled", timer_id);
            return false;
        }
        let duration = config.duration;
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        // held across the spawn so the task never runs ahead of the insert
        let mut timers = lock_timers(&self.active_timers);

        let handle = match (&self.queue, tokio::runtime::Handle::try_current()) {
            (Some(queue), Ok(runtime)) => {
                let queue = Arc::clone(queue);
                let armed = Arc::clone(&self.active_timers);
                Some(runtime.spawn(async move {
                    tokio::time::sleep(duration).await;
                    {
                        let mut timers = lock_timers(&armed);
                        match timers.get(&(mme_ue_id, timer_id)) {
                            Some(instance) if instance.seq == seq => {}
                            _ => return,
                        }
                        if let Some(mut instance) = timers.remove(&(mme_ue_id, timer_id)) {
                            // detach, the task is finishing anyway
                            instance.handle.take();
                        }
                    }
                    log::debug!("Timer {} expired for UE {}", timer_id, mme_ue_id);
                    queue.send(MmeEvent::timer_expired(mme_ue_id, timer_id));
                }))
            }
            _ => None,
        };

        let previous = timers.insert(
            (mme_ue_id, timer_id),
            TimerInstance {
                timer_id,
                seq,
                handle,
            },
        );
        drop(timers);

        if previous.is_some() {
            log::debug!("Restarted timer {} for UE {}", timer_id, mme_ue_id);
        } else {
            log::debug!(
                "Started timer {} for UE {} (duration: {:?})",
                timer_id,
                mme_ue_id,
                duration
            );
        }
        true
    }

    pub fn stop_ue_timer(&mut self, timer_id: MmeTimerId, mme_ue_id: MmeUeId) {
        let removed = lock_timers(&self.active_timers).remove(&(mme_ue_id, timer_id));
        if removed.is_some() {
            log::debug!("Stopped timer {} for UE {}", timer_id, mme_ue_id);
        }
    }

    pub fn stop_all_ue_timers(&mut self, mme_ue_id: MmeUeId) {
        lock_timers(&self.active_timers).retain(|(ue, _), _| *ue != mme_ue_id);
        log::debug!("Stopped all timers for UE {}", mme_ue_id);
    }

    pub fn is_running(&self, timer_id: MmeTimerId, mme_ue_id: MmeUeId) -> bool {
        lock_timers(&self.active_timers).contains_key(&(mme_ue_id, timer_id))
    }

    pub fn active_timer_count(&self) -> usize {
        lock_timers(&self.active_timers).len()
    }

    /// Timers armed for a UE
    pub fn ue_timers(&self, mme_ue_id: MmeUeId) -> Vec<MmeTimerId> {
        lock_timers(&self.active_timers)
            .iter()
            .filter(|((ue, _), _)| *ue == mme_ue_id)
            .map(|(_, t)| t.timer_id)
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MmeContext;
    use tokio::sync::mpsc;

    fn two_ues() -> (MmeUeId, MmeUeId) {
        let mut ctx = MmeContext::new(4);
        (ctx.mme_ue_add().unwrap(), ctx.mme_ue_add().unwrap())
    }

    #[test]
    fn test_timer_config_default() {
        let configs = MmeTimerConfigs::default();
        assert!(configs.t3413.enabled);
        assert_eq!(configs.t3413.max_count, 2);
        assert_eq!(
            configs.get(MmeTimerId::T3413).map(|t| t.duration),
            Some(Duration::from_secs(2))
        );
        assert!(configs.get(MmeTimerId::T3450).is_none());
    }

    #[test]
    fn test_start_stop_without_runtime() {
        let (ue1, ue2) = two_ues();
        let mut timers = TimerManager::default();

        assert!(timers.start_ue_timer(MmeTimerId::T3413, ue1));
        assert!(timers.start_ue_timer(MmeTimerId::T3413, ue1));
        assert!(timers.start_ue_timer(MmeTimerId::T3413, ue2));
        assert_eq!(timers.active_timer_count(), 2);
        assert!(timers.is_running(MmeTimerId::T3413, ue1));
        assert_eq!(timers.ue_timers(ue1), vec![MmeTimerId::T3413]);

        timers.stop_ue_timer(MmeTimerId::T3413, ue1);
        assert!(!timers.is_running(MmeTimerId::T3413, ue1));
        assert!(timers.ue_timers(ue1).is_empty());
        assert_eq!(timers.active_timer_count(), 1);

        timers.stop_all_ue_timers(ue2);
        assert_eq!(timers.active_timer_count(), 0);
    }

    #[test]
    fn test_disabled_timer_not_started() {
        let (ue, _) = two_ues();
        let mut configs = MmeTimerConfigs::default();
        configs.t3413 = TimerConfig::default();
        let mut timers = TimerManager::new(configs);

        assert!(!timers.start_ue_timer(MmeTimerId::T3413, ue));
        assert!(!timers.start_ue_timer(MmeTimerId::T3470, ue));
        assert_eq!(timers.active_timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_posts_event() {
        let (ue, _) = two_ues();
        let (tx, mut rx) = mpsc::unbounded_channel::<MmeEvent>();
        let mut timers = TimerManager::with_queue(MmeTimerConfigs::default(), Arc::new(tx));

        timers.start_ue_timer(MmeTimerId::T3413, ue);
        assert!(timers.is_running(MmeTimerId::T3413, ue));
        assert_eq!(rx.recv().await, Some(MmeEvent::EmmUeT3413 { mme_ue: ue }));

        // the fired timer is no longer armed
        assert!(!timers.is_running(MmeTimerId::T3413, ue));
        assert_eq!(timers.active_timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_timers_leave_armed_set() {
        let mut ctx = MmeContext::new(100);
        let ues: Vec<MmeUeId> = (0..100).map(|_| ctx.mme_ue_add().unwrap()).collect();
        let (tx, mut rx) = mpsc::unbounded_channel::<MmeEvent>();
        let mut timers = TimerManager::with_queue(MmeTimerConfigs::default(), Arc::new(tx));

        for ue in &ues {
            timers.start_ue_timer(MmeTimerId::T3413, *ue);
        }
        assert_eq!(timers.active_timer_count(), 100);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut fired = 0;
        while rx.try_recv().is_ok() {
            fired += 1;
        }
        assert_eq!(fired, 100);
        assert_eq!(timers.active_timer_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_replaces_previous_timer() {
        let (ue, _) = two_ues();
        let (tx, mut rx) = mpsc::unbounded_channel::<MmeEvent>();
        let mut timers = TimerManager::with_queue(MmeTimerConfigs::default(), Arc::new(tx));

        timers.start_ue_timer(MmeTimerId::T3413, ue);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        timers.start_ue_timer(MmeTimerId::T3413, ue);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(rx.try_recv().ok(), Some(MmeEvent::EmmUeT3413 { mme_ue: ue }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_expiry() {
        let (ue, _) = two_ues();
        let (tx, mut rx) = mpsc::unbounded_channel::<MmeEvent>();
        let mut timers = TimerManager::with_queue(MmeTimerConfigs::default(), Arc::new(tx));

        timers.start_ue_timer(MmeTimerId::T3413, ue);
        timers.stop_ue_timer(MmeTimerId::T3413, ue);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }
}
