//! On-disk JSON shapes.
//!
//! Field names follow the files written by earlier deployments: `uid`/`id`
//! keys per platform, `sub_group` for groups, and string-typed ids in the
//! binding list. Numeric ids are accepted wherever strings were written and
//! the other way round.

use live_probe::Channel;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::subscription::{Alias, GroupId, RecipientBinding, Subscription};

pub(crate) const ALIAS_FILE: &str = "dd.json";
pub(crate) const BILIBILI_FILE: &str = "vtb.json";
pub(crate) const YOUTUBE_FILE: &str = "ytb.json";
pub(crate) const BINDING_FILE: &str = "bind.json";

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Int(i64),
    Text(String),
}

fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match Lenient::deserialize(d)? {
        Lenient::Int(v) => Ok(v),
        Lenient::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    let v = lenient_i64(d)?;
    u64::try_from(v).map_err(serde::de::Error::custom)
}

fn lenient_groups<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<GroupId>, D::Error> {
    #[derive(Deserialize)]
    struct Item(#[serde(deserialize_with = "lenient_i64")] i64);

    let items = Vec::<Item>::deserialize(d)?;
    Ok(items.into_iter().map(|Item(v)| v).collect())
}

fn as_string<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&v.to_string())
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BilibiliRecord {
    nickname: String,
    #[serde(deserialize_with = "lenient_u64")]
    uid: u64,
    #[serde(default, deserialize_with = "lenient_groups")]
    sub_group: Vec<GroupId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct YoutubeRecord {
    nickname: String,
    id: String,
    #[serde(default, deserialize_with = "lenient_groups")]
    sub_group: Vec<GroupId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BindingRecord {
    #[serde(deserialize_with = "lenient_i64", serialize_with = "as_string")]
    group_id: i64,
    #[serde(deserialize_with = "lenient_i64", serialize_with = "as_string")]
    target_qq: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct AliasRecord {
    nickname: String,
    #[serde(deserialize_with = "lenient_u64")]
    uid: u64,
}

impl From<BilibiliRecord> for Subscription {
    fn from(r: BilibiliRecord) -> Self {
        Self {
            channel: Channel::Bilibili(r.uid),
            nickname: r.nickname,
            groups: dedup(r.sub_group),
        }
    }
}

impl From<YoutubeRecord> for Subscription {
    fn from(r: YoutubeRecord) -> Self {
        Self {
            channel: Channel::youtube(r.id),
            nickname: r.nickname,
            groups: dedup(r.sub_group),
        }
    }
}

impl From<BindingRecord> for RecipientBinding {
    fn from(r: BindingRecord) -> Self {
        Self {
            group_id: r.group_id,
            target_user: r.target_qq,
        }
    }
}

impl From<&RecipientBinding> for BindingRecord {
    fn from(b: &RecipientBinding) -> Self {
        Self {
            group_id: b.group_id,
            target_qq: b.target_user,
        }
    }
}

impl From<AliasRecord> for Alias {
    fn from(r: AliasRecord) -> Self {
        Self {
            nickname: r.nickname,
            uid: r.uid,
        }
    }
}

impl From<&Alias> for AliasRecord {
    fn from(a: &Alias) -> Self {
        Self {
            nickname: a.nickname.clone(),
            uid: a.uid,
        }
    }
}

pub(crate) fn bilibili_record(sub: &Subscription) -> Option<BilibiliRecord> {
    match &sub.channel {
        Channel::Bilibili(uid) => Some(BilibiliRecord {
            nickname: sub.nickname.clone(),
            uid: *uid,
            sub_group: sub.groups.clone(),
        }),
        Channel::Youtube(_) => None,
    }
}

pub(crate) fn youtube_record(sub: &Subscription) -> Option<YoutubeRecord> {
    match &sub.channel {
        Channel::Youtube(handle) => Some(YoutubeRecord {
            nickname: sub.nickname.clone(),
            id: handle.clone(),
            sub_group: sub.groups.clone(),
        }),
        Channel::Bilibili(_) => None,
    }
}

fn dedup(groups: Vec<GroupId>) -> Vec<GroupId> {
    let mut out = Vec::with_capacity(groups.len());
    for g in groups {
        if !out.contains(&g) {
            out.push(g);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_legacy_files() {
        let vtb: Vec<BilibiliRecord> = serde_json::from_str(
            r#"[{"nickname": "maria", "uid": 1660392980, "sub_group": [123, "456", 123]}]"#,
        )
        .unwrap();
        let sub = Subscription::from(vtb.into_iter().next().unwrap());
        assert_eq!(sub.channel, Channel::Bilibili(1660392980));
        assert_eq!(sub.groups, vec![123, 456]);

        let ytb: Vec<YoutubeRecord> =
            serde_json::from_str(r#"[{"nickname": "maria", "id": "MariaMarionette", "sub_group": [1]}]"#)
                .unwrap();
        let sub = Subscription::from(ytb.into_iter().next().unwrap());
        assert_eq!(sub.channel, Channel::Youtube("@MariaMarionette".into()));

        let bind: Vec<BindingRecord> = serde_json::from_str(
            r#"[{"group_id": "123", "target_qq": "42"}, {"group_id": 124, "target_qq": 43}]"#,
        )
        .unwrap();
        let bindings: Vec<RecipientBinding> = bind.into_iter().map(Into::into).collect();
        assert_eq!(bindings[0], RecipientBinding { group_id: 123, target_user: 42 });
        assert_eq!(bindings[1].group_id, 124);
    }

    #[test]
    fn test_bindings_are_written_as_strings() {
        let record = BindingRecord::from(&RecipientBinding {
            group_id: 7,
            target_user: 8,
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json, serde_json::json!({"group_id": "7", "target_qq": "8"}));
    }

    #[test]
    fn test_rejects_garbage_ids() {
        let res: Result<Vec<AliasRecord>, _> =
            serde_json::from_str(r#"[{"nickname": "x", "uid": "not a number"}]"#);
        assert!(res.is_err());
    }
}
