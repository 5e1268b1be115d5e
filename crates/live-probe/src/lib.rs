//! Upcoming live-stream probes.
//!
//! Each probe maps a [`Channel`] to an optional [`LiveDescriptor`]. Probes are
//! side-effect free; retry and timeout are layered on top with
//! [`RetryingProbe`] and [`probe_with_timeout`].

pub mod bilibili;
pub mod channel;
pub mod client;
pub mod error;
pub mod probe;
pub mod retry;
pub mod youtube;

pub use bilibili::BilibiliProbe;
pub use channel::{Channel, LiveDescriptor, normalize_youtube_handle};
pub use client::{create_client_builder, default_client, install_rustls_provider};
pub use error::ProbeError;
pub use probe::{LiveProbe, ProbeRouter, RetryingProbe, probe_with_timeout};
pub use retry::FixedRetry;
pub use youtube::YoutubeProbe;
