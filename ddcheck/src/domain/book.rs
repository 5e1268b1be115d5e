use std::path::{Path, PathBuf};
use std::sync::Arc;

use live_probe::Channel;
use parking_lot::RwLock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::records::{
    ALIAS_FILE, AliasRecord, BILIBILI_FILE, BINDING_FILE, BilibiliRecord, BindingRecord,
    YOUTUBE_FILE, YoutubeRecord, bilibili_record, youtube_record,
};
use super::subscription::{
    Alias, GroupId, RecipientBinding, SubscribeOutcome, Subscription, UnsubscribeOutcome, UserId,
};
use crate::{Error, Result};

/// Immutable view of every list, taken once per sweep or query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookSnapshot {
    pub subscriptions: Vec<Subscription>,
    pub bindings: Vec<RecipientBinding>,
    pub aliases: Vec<Alias>,
}

impl BookSnapshot {
    pub fn subscription(&self, channel: &Channel) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| &s.channel == channel)
    }

    pub fn bilibili(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| matches!(s.channel, Channel::Bilibili(_)))
    }

    pub fn youtube(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| matches!(s.channel, Channel::Youtube(_)))
    }

    /// Users bound to `group`, in binding order.
    pub fn mentions_for(&self, group: GroupId) -> Vec<UserId> {
        self.bindings
            .iter()
            .filter(|b| b.group_id == group)
            .map(|b| b.target_user)
            .collect()
    }

    /// Every group subscribed to at least one Bilibili channel, first-seen order.
    pub fn bilibili_groups(&self) -> Vec<GroupId> {
        let mut groups = Vec::new();
        for group in self.bilibili().flat_map(|s| s.groups.iter().copied()) {
            if !groups.contains(&group) {
                groups.push(group);
            }
        }
        groups
    }

    pub fn resolve_alias(&self, nickname: &str) -> Option<u64> {
        self.aliases
            .iter()
            .find(|a| a.nickname == nickname)
            .map(|a| a.uid)
    }
}

/// Owner of the subscription, binding and alias lists.
///
/// Mutations build a new snapshot, persist the affected file and only then
/// publish the snapshot, so readers never observe state that failed to save.
pub struct SubscriptionBook {
    dir: Option<PathBuf>,
    state: RwLock<Arc<BookSnapshot>>,
}

impl SubscriptionBook {
    /// Open the book stored in `dir`, creating the directory if needed.
    /// Missing files read as empty lists.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let mut subscriptions: Vec<Subscription> = load_list::<BilibiliRecord>(&dir, BILIBILI_FILE)?
            .into_iter()
            .map(Into::into)
            .collect();
        subscriptions.extend(
            load_list::<YoutubeRecord>(&dir, YOUTUBE_FILE)?
                .into_iter()
                .map(Subscription::from),
        );
        let bindings = load_list::<BindingRecord>(&dir, BINDING_FILE)?
            .into_iter()
            .map(Into::into)
            .collect();
        let aliases = load_list::<AliasRecord>(&dir, ALIAS_FILE)?
            .into_iter()
            .map(Into::into)
            .collect();

        let snapshot = BookSnapshot {
            subscriptions,
            bindings,
            aliases,
        };
        info!(
            dir = %dir.display(),
            subscriptions = snapshot.subscriptions.len(),
            bindings = snapshot.bindings.len(),
            aliases = snapshot.aliases.len(),
            "Subscription book loaded"
        );

        Ok(Self {
            dir: Some(dir),
            state: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// A book that never touches the filesystem.
    pub fn in_memory(snapshot: BookSnapshot) -> Self {
        Self {
            dir: None,
            state: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<BookSnapshot> {
        self.state.read().clone()
    }

    pub fn subscribe(
        &self,
        channel: Channel,
        nickname: impl Into<String>,
        group: GroupId,
    ) -> Result<SubscribeOutcome> {
        let channel = match channel {
            Channel::Youtube(handle) => Channel::youtube(handle),
            other => other,
        };
        let nickname = nickname.into();
        if nickname.trim().is_empty() {
            return Err(Error::validation("nickname must not be empty"));
        }

        self.mutate(Lists::of(&channel), |next| {
            match next.subscriptions.iter_mut().find(|s| s.channel == channel) {
                Some(existing) => {
                    if existing.add_group(group) {
                        SubscribeOutcome::GroupAdded
                    } else {
                        SubscribeOutcome::AlreadySubscribed
                    }
                }
                None => {
                    next.subscriptions
                        .push(Subscription::new(channel.clone(), nickname, group));
                    SubscribeOutcome::Created
                }
            }
        })
    }

    /// Remove `group` from the channel's subscribers. Timers that are already
    /// armed keep their recipients.
    pub fn unsubscribe(&self, channel: &Channel, group: GroupId) -> Result<UnsubscribeOutcome> {
        let channel = match channel {
            Channel::Youtube(handle) => Channel::youtube(handle),
            other => other.clone(),
        };

        self.mutate(Lists::of(&channel), |next| {
            let Some(pos) = next.subscriptions.iter().position(|s| s.channel == channel) else {
                return UnsubscribeOutcome::NotSubscribed;
            };
            let sub = &mut next.subscriptions[pos];
            if !sub.remove_group(group) {
                return UnsubscribeOutcome::NotSubscribed;
            }
            if sub.groups.is_empty() {
                next.subscriptions.remove(pos);
                UnsubscribeOutcome::SubscriptionRemoved
            } else {
                UnsubscribeOutcome::GroupRemoved
            }
        })
    }

    /// Returns `false` when the user was already bound to the group.
    pub fn bind(&self, group: GroupId, user: UserId) -> Result<bool> {
        let binding = RecipientBinding {
            group_id: group,
            target_user: user,
        };
        self.mutate(Lists::BINDINGS, |next| {
            if next.bindings.contains(&binding) {
                return false;
            }
            next.bindings.push(binding);
            true
        })
    }

    /// Returns `false` when no such binding existed.
    pub fn unbind(&self, group: GroupId, user: UserId) -> Result<bool> {
        self.mutate(Lists::BINDINGS, |next| {
            let before = next.bindings.len();
            next.bindings
                .retain(|b| !(b.group_id == group && b.target_user == user));
            next.bindings.len() != before
        })
    }

    /// Insert or update an alias.
    pub fn set_alias(&self, nickname: impl Into<String>, uid: u64) -> Result<()> {
        let nickname = nickname.into();
        if nickname.trim().is_empty() {
            return Err(Error::validation("alias must not be empty"));
        }
        self.mutate(Lists::ALIASES, |next| {
            match next.aliases.iter_mut().find(|a| a.nickname == nickname) {
                Some(alias) => alias.uid = uid,
                None => next.aliases.push(Alias { nickname, uid }),
            }
        })
    }

    pub fn remove_alias(&self, nickname: &str) -> Result<bool> {
        self.mutate(Lists::ALIASES, |next| {
            let before = next.aliases.len();
            next.aliases.retain(|a| a.nickname != nickname);
            next.aliases.len() != before
        })
    }

    pub fn resolve_alias(&self, nickname: &str) -> Option<u64> {
        self.snapshot().resolve_alias(nickname)
    }

    fn mutate<T>(&self, lists: Lists, f: impl FnOnce(&mut BookSnapshot) -> T) -> Result<T> {
        let mut state = self.state.write();
        let mut next = BookSnapshot::clone(&state);
        let out = f(&mut next);

        if next != **state {
            if let Some(dir) = &self.dir {
                persist(dir, &next, lists)?;
            }
            *state = Arc::new(next);
        }
        Ok(out)
    }
}

/// Which files a mutation may have touched.
#[derive(Debug, Clone, Copy)]
struct Lists {
    bilibili: bool,
    youtube: bool,
    bindings: bool,
    aliases: bool,
}

impl Lists {
    const NONE: Self = Self {
        bilibili: false,
        youtube: false,
        bindings: false,
        aliases: false,
    };
    const BINDINGS: Self = Self {
        bindings: true,
        ..Self::NONE
    };
    const ALIASES: Self = Self {
        aliases: true,
        ..Self::NONE
    };

    fn of(channel: &Channel) -> Self {
        match channel {
            Channel::Bilibili(_) => Self {
                bilibili: true,
                ..Self::NONE
            },
            Channel::Youtube(_) => Self {
                youtube: true,
                ..Self::NONE
            },
        }
    }
}

fn persist(dir: &Path, snapshot: &BookSnapshot, lists: Lists) -> Result<()> {
    if lists.bilibili {
        let records: Vec<_> = snapshot
            .subscriptions
            .iter()
            .filter_map(bilibili_record)
            .collect();
        save_list(dir, BILIBILI_FILE, &records)?;
    }
    if lists.youtube {
        let records: Vec<_> = snapshot
            .subscriptions
            .iter()
            .filter_map(youtube_record)
            .collect();
        save_list(dir, YOUTUBE_FILE, &records)?;
    }
    if lists.bindings {
        let records: Vec<BindingRecord> = snapshot.bindings.iter().map(Into::into).collect();
        save_list(dir, BINDING_FILE, &records)?;
    }
    if lists.aliases {
        let records: Vec<AliasRecord> = snapshot.aliases.iter().map(Into::into).collect();
        save_list(dir, ALIAS_FILE, &records)?;
    }
    Ok(())
}

fn load_list<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<Vec<T>> {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
        Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
            Error::validation(format!("Failed to parse {}: {e}", path.display()))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "List file missing, starting empty");
            Ok(Vec::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write via a temporary file and rename so a crash never leaves a torn list.
fn save_list<T: Serialize>(dir: &Path, name: &str, records: &[T]) -> Result<()> {
    let path = dir.join(name);
    let tmp = dir.join(format!("{name}.tmp"));
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, &path)?;
    debug!(path = %path.display(), count = records.len(), "List saved");
    Ok(())
}
