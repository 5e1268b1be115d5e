//! Pending-notification timers, at most one per channel.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use live_probe::Channel;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Result of an [`TimerRegistry::arm`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    /// A timer is already pending; the new release time was ignored.
    AlreadyArmed { release_time: i64 },
    /// The release time is not in the future; nothing was scheduled.
    Stale,
}

struct TimerEntry {
    release_time: i64,
    token: CancellationToken,
}

/// Registry of armed notification timers keyed by channel.
///
/// The check and the insert in [`arm`](Self::arm) happen under one lock with
/// no await in between, so concurrent sweeps can never arm the same channel
/// twice. An entry is removed exactly once, when its timer task ends.
pub struct TimerRegistry {
    entries: Mutex<HashMap<Channel, TimerEntry>>,
    shutdown: CancellationToken,
}

impl TimerRegistry {
    /// Timers are children of `shutdown` and die with it.
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            shutdown,
        })
    }

    pub fn has(&self, channel: &Channel) -> bool {
        self.entries.lock().contains_key(channel)
    }

    /// Release time the pending timer for `channel` was armed with.
    pub fn armed_release_time(&self, channel: &Channel) -> Option<i64> {
        self.entries.lock().get(channel).map(|e| e.release_time)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Schedule `on_fire` to run after `delay_secs` unless a timer for
    /// `channel` is already pending or the delay is not positive.
    pub fn arm<F, Fut>(
        self: &Arc<Self>,
        channel: Channel,
        release_time: i64,
        delay_secs: i64,
        on_fire: F,
    ) -> ArmOutcome
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if delay_secs <= 0 {
            trace!(%channel, delay_secs, "Release time already passed, not arming");
            return ArmOutcome::Stale;
        }

        let token = {
            let mut entries = self.entries.lock();
            if let Some(existing) = entries.get(&channel) {
                return ArmOutcome::AlreadyArmed {
                    release_time: existing.release_time,
                };
            }
            let token = self.shutdown.child_token();
            entries.insert(
                channel.clone(),
                TimerEntry {
                    release_time,
                    token: token.clone(),
                },
            );
            token
        };

        debug!(%channel, release_time, delay_secs, "Notification timer armed");

        let guard = ClearOnDrop {
            registry: Arc::clone(self),
            channel,
        };
        let delay = Duration::from_secs(delay_secs.unsigned_abs());
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(channel = %guard.channel, "Notification timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    on_fire().await;
                }
            }
            drop(guard);
        });

        ArmOutcome::Armed
    }

    /// Stop the pending timer for `channel` without delivering.
    ///
    /// Unsubscribing does not call this; armed timers keep the recipients
    /// they were armed with.
    pub fn cancel(&self, channel: &Channel) -> bool {
        match self.entries.lock().get(channel) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    fn clear(&self, channel: &Channel) {
        if self.entries.lock().remove(channel).is_some() {
            trace!(%channel, "Notification timer cleared");
        }
    }
}

/// Clears the entry when the timer task finishes, including by panic.
struct ClearOnDrop {
    registry: Arc<TimerRegistry>,
    channel: Channel,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        self.registry.clear(&self.channel);
    }
}
