//! The live-notification poll loop.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use futures::future::join_all;
use live_probe::{Channel, LiveDescriptor, LiveProbe, probe_with_timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::{ArmOutcome, TimerRegistry};
use crate::Result;
use crate::clock::Clock;
use crate::config::SchedulerSettings;
use crate::domain::{GroupId, Subscription, SubscriptionBook};
use crate::notification::{MessageSender, build_live_message};

/// Counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub armed: usize,
    pub already_armed: usize,
    pub stale: usize,
    pub nothing_scheduled: usize,
    pub failed: usize,
}

/// Outcome of delivering one fired notification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<GroupId>,
    pub failed: Vec<GroupId>,
}

/// Probes every subscribed channel on a fixed cadence and arms a timer per
/// upcoming stream.
pub struct Scheduler {
    book: Arc<SubscriptionBook>,
    probe: Arc<dyn LiveProbe>,
    sender: Arc<dyn MessageSender>,
    clock: Arc<dyn Clock>,
    registry: Arc<TimerRegistry>,
    poll_interval: Duration,
    probe_timeout: Duration,
    sweep_concurrency: usize,
}

impl Scheduler {
    pub fn new(
        book: Arc<SubscriptionBook>,
        probe: Arc<dyn LiveProbe>,
        sender: Arc<dyn MessageSender>,
        clock: Arc<dyn Clock>,
        registry: Arc<TimerRegistry>,
        settings: &SchedulerSettings,
    ) -> Self {
        Self {
            book,
            probe,
            sender,
            clock,
            registry,
            poll_interval: settings.poll_interval(),
            probe_timeout: settings.probe_timeout(),
            sweep_concurrency: settings.sweep_concurrency.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<TimerRegistry> {
        &self.registry
    }

    /// Sweep, then sleep for the poll interval, until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Live notification loop started"
        );
        loop {
            let report = self.sweep().await;
            info!(
                probed = report.probed,
                armed = report.armed,
                pending = self.registry.len(),
                failed = report.failed,
                "Sweep finished"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Live notification loop stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Probe every subscribed channel once and arm timers for upcoming
    /// streams. A failing channel never aborts the sweep.
    ///
    /// At most `sweep_concurrency` probes are in flight, since Bilibili
    /// answers bursts with rate-limit codes.
    pub async fn sweep(&self) -> SweepReport {
        let snapshot = self.book.snapshot();
        let probes: Vec<_> = snapshot
            .subscriptions
            .iter()
            .map(|sub| async move {
                let result =
                    probe_with_timeout(self.probe.as_ref(), &sub.channel, self.probe_timeout).await;
                (sub, result)
            })
            .collect();
        let results: Vec<_> = futures::stream::iter(probes)
            .buffer_unordered(self.sweep_concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (sub, result) in results {
            report.probed += 1;
            match result {
                Ok(Some(live)) => match self.arm(sub, live) {
                    ArmOutcome::Armed => report.armed += 1,
                    ArmOutcome::AlreadyArmed { .. } => report.already_armed += 1,
                    ArmOutcome::Stale => report.stale += 1,
                },
                Ok(None) => {
                    debug!(channel = %sub.channel, "Nothing scheduled");
                    report.nothing_scheduled += 1;
                }
                Err(e) => {
                    warn!(channel = %sub.channel, error = %e, "Probe failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn arm(&self, sub: &Subscription, live: LiveDescriptor) -> ArmOutcome {
        let delay = live.delay_from(self.clock.now());
        let release_time = live.release_time;

        let notification = Notification {
            channel: sub.channel.clone(),
            nickname: sub.nickname.clone(),
            groups: sub.groups.clone(),
            live,
        };
        let book = Arc::clone(&self.book);
        let sender = Arc::clone(&self.sender);

        let outcome = self
            .registry
            .arm(sub.channel.clone(), release_time, delay, move || async move {
                notification.deliver(&book, sender.as_ref()).await;
            });

        if let ArmOutcome::AlreadyArmed {
            release_time: armed,
        } = outcome
            && armed != release_time
        {
            info!(
                channel = %sub.channel,
                armed,
                observed = release_time,
                "Release time changed while a timer is pending, keeping the first"
            );
        }
        outcome
    }
}

/// Everything needed to deliver one fired timer.
///
/// Recipient groups are fixed when the timer is armed; mention bindings are
/// read when it fires.
struct Notification {
    channel: Channel,
    nickname: String,
    groups: Vec<GroupId>,
    live: LiveDescriptor,
}

impl Notification {
    async fn deliver(&self, book: &SubscriptionBook, sender: &dyn MessageSender) -> DeliveryReport {
        let snapshot = book.snapshot();
        let sends = self.groups.iter().map(|&group| {
            let message = build_live_message(&snapshot.mentions_for(group), &self.nickname, &self.live);
            async move { (group, sender.send_group_message(group, &message).await) }
        });

        let mut report = DeliveryReport::default();
        for (group, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered.push(group),
                Err(e) => {
                    warn!(channel = %self.channel, group, error = %e, "Live notification not delivered");
                    report.failed.push(group);
                }
            }
        }

        info!(
            channel = %self.channel,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Live notification sent"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::BookSnapshot;
    use crate::notification::testing::RecordingSender;
    use crate::scheduler::testing::ScriptedProbe;

    const NOW: i64 = 1_700_000_000;

    struct Fixture {
        book: Arc<SubscriptionBook>,
        probe: Arc<ScriptedProbe>,
        sender: Arc<RecordingSender>,
        clock: ManualClock,
        scheduler: Scheduler,
    }

    fn fixture(sender: RecordingSender) -> Fixture {
        fixture_with(sender, &SchedulerSettings::default())
    }

    fn fixture_with(sender: RecordingSender, settings: &SchedulerSettings) -> Fixture {
        let book = Arc::new(SubscriptionBook::in_memory(BookSnapshot::default()));
        let probe = Arc::new(ScriptedProbe::default());
        let sender = Arc::new(sender);
        let clock = ManualClock::new(NOW);
        let scheduler = Scheduler::new(
            Arc::clone(&book),
            probe.clone(),
            sender.clone(),
            Arc::new(clock.clone()),
            TimerRegistry::new(CancellationToken::new()),
            settings,
        );
        Fixture {
            book,
            probe,
            sender,
            clock,
            scheduler,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_subscription_with_scheduled_stream() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(1);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 3600, "u"))));

        let report = fx.scheduler.sweep().await;
        assert_eq!(report.armed, 1);
        assert!(fx.scheduler.registry().has(&x));

        tokio::time::sleep(Duration::from_secs(3599)).await;
        assert!(fx.sender.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let texts = fx.sender.texts_for(100);
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("maria"));
        assert!(texts[0].contains("u"));
        assert!(!fx.scheduler.registry().has(&x));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_poll_before_firing() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::youtube("@maria");
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 600, "u"))));

        assert_eq!(fx.scheduler.sweep().await.armed, 1);
        fx.clock.advance(60);
        tokio::time::sleep(Duration::from_secs(60)).await;
        let second = fx.scheduler.sweep().await;
        assert_eq!(second.armed, 0);
        assert_eq!(second.already_armed, 1);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fx.sender.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_returns_none() {
        let fx = fixture(RecordingSender::default());
        let y = Channel::Bilibili(2);
        fx.book.subscribe(y.clone(), "nobody", 100).unwrap();
        fx.probe.set(&y, Ok(None));

        let report = fx.scheduler.sweep().await;
        assert_eq!(report.nothing_scheduled, 1);
        assert!(fx.scheduler.registry().is_empty());

        tokio::time::sleep(Duration::from_secs(7200)).await;
        assert!(fx.sender.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_release_time_is_not_armed() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(3);
        fx.book.subscribe(x.clone(), "late", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW - 10, "u"))));

        assert_eq!(fx.scheduler.sweep().await.stale, 1);
        assert!(!fx.scheduler.registry().has(&x));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_channel_does_not_abort_sweep() {
        let fx = fixture(RecordingSender::default());
        let bad = Channel::Bilibili(4);
        let good = Channel::Bilibili(5);
        fx.book.subscribe(bad.clone(), "bad", 100).unwrap();
        fx.book.subscribe(good.clone(), "good", 100).unwrap();
        fx.probe.set(&bad, Err("rate limited".into()));
        fx.probe.set(&good, Ok(Some(LiveDescriptor::new(NOW + 60, "u"))));

        let report = fx.scheduler.sweep().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.armed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_probe_times_out() {
        let fx = fixture(RecordingSender::default());
        let slow = Channel::Bilibili(6);
        fx.book.subscribe(slow.clone(), "slow", 100).unwrap();
        fx.probe.hang(&slow);

        let report = fx.scheduler.sweep().await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_limits_channels_in_flight() {
        let settings = SchedulerSettings {
            sweep_concurrency: 2,
            ..SchedulerSettings::default()
        };
        let fx = fixture_with(RecordingSender::default(), &settings);
        for uid in 1..=5 {
            let channel = Channel::Bilibili(uid);
            fx.book.subscribe(channel.clone(), "slow", 100).unwrap();
            fx.probe.hang(&channel);
        }
        let started = tokio::time::Instant::now();

        let report = fx.scheduler.sweep().await;

        // Five 20 s timeouts, two at a time.
        assert_eq!(report.failed, 5);
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_group_delivery_isolation() {
        let fx = fixture(RecordingSender::failing_for([100]));
        let x = Channel::Bilibili(7);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.book.subscribe(x.clone(), "maria", 200).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 30, "u"))));

        fx.scheduler.sweep().await;
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(fx.sender.texts_for(100).is_empty());
        assert_eq!(fx.sender.texts_for(200).len(), 1);
        assert!(!fx.scheduler.registry().has(&x));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_after_firing() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(8);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 30, "u"))));

        fx.scheduler.sweep().await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        fx.clock.advance(31);

        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 86_400, "u2"))));
        assert_eq!(fx.scheduler.sweep().await.armed, 1);
        assert_eq!(fx.scheduler.registry().armed_release_time(&x), Some(NOW + 86_400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_observed_release_time_wins() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(9);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 3600, "u"))));
        fx.scheduler.sweep().await;

        // Stream rescheduled an hour later; the pending timer is kept.
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 7200, "u"))));
        let report = fx.scheduler.sweep().await;
        assert_eq!(report.already_armed, 1);
        assert_eq!(fx.scheduler.registry().armed_release_time(&x), Some(NOW + 3600));

        tokio::time::sleep(Duration::from_secs(3601)).await;
        assert_eq!(fx.sender.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_does_not_cancel_pending_delivery() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(10);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 60, "u"))));
        fx.scheduler.sweep().await;

        fx.book.unsubscribe(&x, 100).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fx.sender.texts_for(100).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mentions_read_at_fire_time() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(11);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(Some(LiveDescriptor::new(NOW + 60, "u"))));
        fx.scheduler.sweep().await;

        fx.book.bind(100, 555).unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(fx.sender.texts_for(100)[0].starts_with("@555 maria开播啦！"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let fx = fixture(RecordingSender::default());
        let x = Channel::Bilibili(12);
        fx.book.subscribe(x.clone(), "maria", 100).unwrap();
        fx.probe.set(&x, Ok(None));

        let scheduler = Arc::new(fx.scheduler);
        let cancel = CancellationToken::new();
        let handle = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(3600 * 2 + 1)).await;
        assert_eq!(fx.probe.calls(&x), 3);

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
