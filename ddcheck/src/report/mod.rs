//! Follow-list report: how many of a user's follows are VTubers.
//!
//! The user is resolved from an alias, a numeric uid or an exact name
//! search; the follow list is intersected with the [`VtbDirectory`] and fan
//! medals from the medal wall are attached where the streamer names match.

mod directory;
mod users;
mod wbi;

use std::collections::{HashMap, HashSet};
use std::fmt::Write;
use std::sync::Arc;

use tracing::{info, warn};

pub use directory::{CACHE_FILE, DEFAULT_MIRRORS, VtbDirectory, VtbEntry};
pub use users::{BilibiliUserApi, Medal, UserCard, UserLookup};
pub use wbi::{WbiKeys, sign_query};

use crate::domain::SubscriptionBook;
use crate::error_chain;

pub const NAME_LOOKUP_FAILED: &str = "获取用户信息失败，请检查名称或使用uid查询";
pub const USER_INFO_FAILED: &str = "获取用户信息失败，请检查名称或稍后再试";
pub const FOLLOWINGS_HIDDEN: &str = "获取用户关注列表失败，关注列表可能未公开";
pub const DIRECTORY_FAILED: &str = "获取vtb列表失败，请稍后再试";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMedal {
    pub name: String,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportVtb {
    pub name: String,
    pub uid: u64,
    pub medal: Option<ReportMedal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DdReport {
    pub name: String,
    pub uid: u64,
    pub fans: u64,
    pub follows: usize,
    pub vtbs: Vec<ReportVtb>,
    pub percent: f64,
}

impl DdReport {
    pub fn header(&self) -> String {
        format!("vtb-{:.2}%({})", self.percent, self.vtbs.len())
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{} (UID: {})\n粉丝: {}  关注: {}\n{}",
            self.name,
            self.uid,
            self.fans,
            self.follows,
            self.header()
        );
        for vtb in &self.vtbs {
            let _ = write!(out, "\n{} ({})", vtb.name, vtb.uid);
            if let Some(medal) = &vtb.medal {
                let _ = write!(out, " [{} {}]", medal.name, medal.level);
            }
        }
        out
    }
}

/// Intersect `followings` with the directory, keeping directory order.
pub fn compute_report(
    user: &UserCard,
    followings: &[u64],
    directory: &[VtbEntry],
    medals: &[Medal],
) -> DdReport {
    let following: HashSet<u64> = followings.iter().copied().collect();
    let medal_by_target: HashMap<&str, &Medal> =
        medals.iter().map(|m| (m.target_name.as_str(), m)).collect();

    let mut seen = HashSet::new();
    let vtbs: Vec<ReportVtb> = directory
        .iter()
        .filter(|entry| seen.insert(entry.mid) && following.contains(&entry.mid))
        .map(|entry| ReportVtb {
            name: entry.uname.clone(),
            uid: entry.mid,
            medal: medal_by_target.get(entry.uname.as_str()).map(|m| ReportMedal {
                name: m.name.clone(),
                level: m.level,
            }),
        })
        .collect();

    let follows = followings.len();
    let percent = if follows == 0 {
        0.0
    } else {
        vtbs.len() as f64 / follows as f64 * 100.0
    };

    DdReport {
        name: user.name.clone(),
        uid: user.mid,
        fans: user.fans,
        follows,
        vtbs,
        percent,
    }
}

/// Answers "check" queries with either a rendered report or a failure line.
pub struct ReportService {
    book: Arc<SubscriptionBook>,
    users: Arc<dyn UserLookup>,
    directory: Arc<VtbDirectory>,
}

impl ReportService {
    pub fn new(
        book: Arc<SubscriptionBook>,
        users: Arc<dyn UserLookup>,
        directory: Arc<VtbDirectory>,
    ) -> Self {
        Self {
            book,
            users,
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<VtbDirectory> {
        &self.directory
    }

    pub async fn check(&self, query: &str) -> String {
        match self.report(query).await {
            Ok(report) => report.render_text(),
            Err(line) => line.to_string(),
        }
    }

    /// Build the report, or the user-facing failure line.
    pub async fn report(&self, query: &str) -> std::result::Result<DdReport, &'static str> {
        let query = query.trim();
        let uid = match self.resolve_uid(query).await {
            Some(uid) => uid,
            None => return Err(NAME_LOOKUP_FAILED),
        };

        let card = self.users.user_card(uid).await.map_err(|e| {
            warn!(uid, error = %error_chain(&e), "User card lookup failed");
            USER_INFO_FAILED
        })?;

        let followings = match self.users.followings(uid).await {
            Ok(followings) => followings,
            Err(e) => {
                warn!(uid, error = %error_chain(&e), "Followings lookup failed");
                Vec::new()
            }
        };
        if followings.is_empty() && card.attention > 0 {
            return Err(FOLLOWINGS_HIDDEN);
        }

        let directory = match self.directory.entries().await {
            Ok(entries) if !entries.is_empty() => entries,
            Ok(_) => return Err(DIRECTORY_FAILED),
            Err(e) => {
                warn!(error = %error_chain(&e), "VTuber directory unavailable");
                return Err(DIRECTORY_FAILED);
            }
        };

        let medals = self.users.medals(uid).await.unwrap_or_else(|e| {
            warn!(uid, error = %e, "Medal wall unavailable");
            Vec::new()
        });

        let report = compute_report(&card, &followings, &directory, &medals);
        info!(uid, vtbs = report.vtbs.len(), follows = report.follows, "Built follow-list report");
        Ok(report)
    }

    async fn resolve_uid(&self, query: &str) -> Option<u64> {
        if let Some(uid) = self.book.resolve_alias(query) {
            return Some(uid);
        }
        if !query.is_empty() && query.bytes().all(|b| b.is_ascii_digit()) {
            return query.parse().ok();
        }
        match self.users.search_uid(query).await {
            Ok(found) => found,
            Err(e) => {
                warn!(query, error = %error_chain(&e), "Name search failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookSnapshot;
    use crate::{Error, Result};
    use async_trait::async_trait;

    fn card(mid: u64, attention: u64) -> UserCard {
        UserCard {
            mid,
            name: "查询对象".into(),
            face: String::new(),
            fans: 42,
            attention,
        }
    }

    fn entry(mid: u64, uname: &str) -> VtbEntry {
        VtbEntry {
            mid,
            uname: uname.into(),
        }
    }

    #[derive(Default)]
    struct FakeUsers {
        cards: HashMap<u64, UserCard>,
        followings: HashMap<u64, Vec<u64>>,
        medals: Option<Vec<Medal>>,
        names: HashMap<String, u64>,
    }

    #[async_trait]
    impl UserLookup for FakeUsers {
        async fn user_card(&self, uid: u64) -> Result<UserCard> {
            self.cards.get(&uid).cloned().ok_or(Error::Upstream {
                code: -404,
                message: "啥都木有".into(),
            })
        }

        async fn followings(&self, uid: u64) -> Result<Vec<u64>> {
            Ok(self.followings.get(&uid).cloned().unwrap_or_default())
        }

        async fn medals(&self, _uid: u64) -> Result<Vec<Medal>> {
            self.medals
                .clone()
                .ok_or_else(|| Error::Other("medal wall down".into()))
        }

        async fn search_uid(&self, name: &str) -> Result<Option<u64>> {
            Ok(self.names.get(name).copied())
        }
    }

    fn service(users: FakeUsers, dir: &std::path::Path, entries: &[VtbEntry]) -> ReportService {
        std::fs::write(
            dir.join(CACHE_FILE),
            serde_json::to_string(entries).unwrap(),
        )
        .unwrap();
        let directory = VtbDirectory::new(live_probe::default_client().unwrap(), dir, Vec::new());
        let book = SubscriptionBook::in_memory(BookSnapshot::default());
        book.set_alias("小号", 100).unwrap();
        ReportService::new(Arc::new(book), Arc::new(users), Arc::new(directory))
    }

    #[test]
    fn test_compute_report() {
        let directory = vec![entry(3, "C"), entry(1, "A"), entry(9, "Z"), entry(1, "A dup")];
        let medals = vec![Medal {
            target_name: "A".into(),
            name: "粉丝团".into(),
            level: 12,
        }];
        let report = compute_report(&card(100, 4), &[1, 2, 3, 4], &directory, &medals);

        assert_eq!(report.follows, 4);
        assert_eq!(report.vtbs.len(), 2);
        assert_eq!(report.vtbs[0].name, "C");
        assert_eq!(report.vtbs[1].uid, 1);
        assert_eq!(report.vtbs[1].medal.as_ref().unwrap().level, 12);
        assert!(report.vtbs[0].medal.is_none());
        assert_eq!(report.header(), "vtb-50.00%(2)");
    }

    #[test]
    fn test_compute_report_no_follows() {
        let report = compute_report(&card(1, 0), &[], &[entry(1, "A")], &[]);
        assert_eq!(report.percent, 0.0);
        assert_eq!(report.header(), "vtb-0.00%(0)");
    }

    #[test]
    fn test_render_text() {
        let report = compute_report(
            &card(100, 3),
            &[1, 2, 3],
            &[entry(1, "A")],
            &[Medal {
                target_name: "A".into(),
                name: "牌子".into(),
                level: 5,
            }],
        );
        assert_eq!(
            report.render_text(),
            "查询对象 (UID: 100)\n粉丝: 42  关注: 3\nvtb-33.33%(1)\nA (1) [牌子 5]"
        );
    }

    #[tokio::test]
    async fn test_check_by_alias_uid_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let users = FakeUsers {
            cards: HashMap::from([(100, card(100, 2)), (200, card(200, 1))]),
            followings: HashMap::from([(100, vec![1, 5]), (200, vec![1])]),
            names: HashMap::from([("某人".to_string(), 200)]),
            ..Default::default()
        };
        let service = service(users, dir.path(), &[entry(1, "A")]);

        let by_alias = service.report("小号").await.unwrap();
        assert_eq!(by_alias.uid, 100);
        assert_eq!(by_alias.header(), "vtb-50.00%(1)");
        // Medal wall failures degrade to no medals.
        assert!(by_alias.vtbs[0].medal.is_none());

        assert_eq!(service.report("200").await.unwrap().uid, 200);
        assert_eq!(service.report("某人").await.unwrap().uid, 200);
    }

    #[tokio::test]
    async fn test_check_failure_lines() {
        let dir = tempfile::tempdir().unwrap();
        let users = FakeUsers {
            cards: HashMap::from([(100, card(100, 10)), (300, card(300, 0))]),
            ..Default::default()
        };
        let service = service(users, dir.path(), &[]);

        assert_eq!(service.check("查无此人").await, NAME_LOOKUP_FAILED);
        assert_eq!(service.check("404").await, USER_INFO_FAILED);
        assert_eq!(service.check("100").await, FOLLOWINGS_HIDDEN);
        // Empty cache and no mirrors.
        assert_eq!(service.check("300").await, DIRECTORY_FAILED);
    }
}
