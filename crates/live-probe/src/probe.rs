//! The probe abstraction and its combinators.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channel::{Channel, LiveDescriptor};
use crate::error::ProbeError;
use crate::retry::FixedRetry;

/// Read-only upstream query for the next scheduled or ongoing stream.
///
/// `Ok(None)` means the platform reports nothing upcoming. A returned
/// descriptor may carry a release time in the past.
#[async_trait]
pub trait LiveProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError>;

    /// Upper bound this probe enforces on a single call, if any.
    fn deadline(&self) -> Option<Duration> {
        None
    }
}

/// Applies a [`FixedRetry`] policy around another probe.
///
/// With an attempt timeout each try is cut off on its own and the expiry is
/// retried like any other transient error.
pub struct RetryingProbe<P> {
    inner: P,
    policy: FixedRetry,
    attempt_timeout: Option<Duration>,
}

impl<P: LiveProbe> RetryingProbe<P> {
    pub fn new(inner: P, policy: FixedRetry) -> Self {
        Self {
            inner,
            policy,
            attempt_timeout: None,
        }
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    async fn attempt(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.probe(channel))
                .await
                .unwrap_or(Err(ProbeError::Timeout(limit))),
            None => self.inner.probe(channel).await,
        }
    }
}

#[async_trait]
impl<P: LiveProbe> LiveProbe for RetryingProbe<P> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn probe(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError> {
        let label = channel.to_string();
        self.policy
            .run(&label, || self.attempt(channel))
            .await
    }

    fn deadline(&self) -> Option<Duration> {
        self.attempt_timeout.map(|limit| self.policy.budget(limit))
    }
}

/// Routes a channel to the probe of its platform.
#[derive(Clone)]
pub struct ProbeRouter {
    bilibili: Arc<dyn LiveProbe>,
    youtube: Arc<dyn LiveProbe>,
}

impl ProbeRouter {
    pub fn new(bilibili: Arc<dyn LiveProbe>, youtube: Arc<dyn LiveProbe>) -> Self {
        Self { bilibili, youtube }
    }
}

#[async_trait]
impl LiveProbe for ProbeRouter {
    fn name(&self) -> &'static str {
        "router"
    }

    async fn probe(&self, channel: &Channel) -> Result<Option<LiveDescriptor>, ProbeError> {
        match channel {
            Channel::Bilibili(_) => self.bilibili.probe(channel).await,
            Channel::Youtube(_) => self.youtube.probe(channel).await,
        }
    }

    fn deadline(&self) -> Option<Duration> {
        self.bilibili.deadline().max(self.youtube.deadline())
    }
}

/// Run one probe call under an overall deadline.
///
/// The deadline is `timeout` or the probe's own [`LiveProbe::deadline`],
/// whichever is longer, so a retrying probe always gets to finish its
/// attempts.
pub async fn probe_with_timeout(
    probe: &dyn LiveProbe,
    channel: &Channel,
    timeout: Duration,
) -> Result<Option<LiveDescriptor>, ProbeError> {
    let limit = probe.deadline().map_or(timeout, |own| own.max(timeout));
    match tokio::time::timeout(limit, probe.probe(channel)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(limit)),
    }
}
