//! On-demand "when is everyone live" query.

use std::time::Duration;

use futures::future::join_all;
use live_probe::{LiveProbe, probe_with_timeout};
use tracing::warn;

use crate::clock::Clock;
use crate::domain::BookSnapshot;
use crate::notification::format_time_left;

/// One line per YouTube subscription describing its next stream.
pub async fn when_live(
    snapshot: &BookSnapshot,
    probe: &dyn LiveProbe,
    clock: &dyn Clock,
    timeout: Duration,
) -> String {
    let subs: Vec<_> = snapshot.youtube().collect();
    if subs.is_empty() {
        return "还没有关注任何人呢".to_string();
    }

    let results = join_all(
        subs.iter()
            .map(|sub| probe_with_timeout(probe, &sub.channel, timeout)),
    )
    .await;

    let now = clock.now();
    subs.iter()
        .zip(results)
        .map(|(sub, result)| match result {
            Ok(Some(live)) => {
                let mut line = format!(
                    "{}{}(youtube)",
                    sub.nickname,
                    format_time_left(live.release_time, now)
                );
                if let Some(title) = live.title.filter(|t| !t.is_empty()) {
                    line.push('\n');
                    line.push_str(&title);
                }
                line
            }
            Ok(None) => format!("{}还没有发布youtube的直播预告", sub.nickname),
            Err(e) => {
                warn!(channel = %sub.channel, error = %e, "When-live probe failed");
                format!("{}的直播预告获取失败", sub.nickname)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
