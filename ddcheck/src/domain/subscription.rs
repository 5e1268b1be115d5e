use live_probe::Channel;

/// Chat group identifier.
pub type GroupId = i64;

/// Chat user identifier.
pub type UserId = i64;

/// A followed channel and the groups that want its notifications.
///
/// `groups` keeps insertion order and never holds duplicates. A record with
/// no groups is removed from the book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: Channel,
    pub nickname: String,
    pub groups: Vec<GroupId>,
}

impl Subscription {
    pub fn new(channel: Channel, nickname: impl Into<String>, group: GroupId) -> Self {
        Self {
            channel,
            nickname: nickname.into(),
            groups: vec![group],
        }
    }

    pub fn has_group(&self, group: GroupId) -> bool {
        self.groups.contains(&group)
    }

    /// Returns `false` when the group was already present.
    pub fn add_group(&mut self, group: GroupId) -> bool {
        if self.has_group(group) {
            return false;
        }
        self.groups.push(group);
        true
    }

    /// Returns `false` when the group was not present.
    pub fn remove_group(&mut self, group: GroupId) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| *g != group);
        self.groups.len() != before
    }
}

/// A user to mention whenever a notification is delivered to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientBinding {
    pub group_id: GroupId,
    pub target_user: UserId,
}

/// Operator-defined shorthand for a Bilibili UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub nickname: String,
    pub uid: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    GroupAdded,
    AlreadySubscribed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    GroupRemoved,
    /// The last group left, so the record was deleted.
    SubscriptionRemoved,
    NotSubscribed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_set_semantics() {
        let mut sub = Subscription::new(Channel::Bilibili(1), "a", 10);
        assert!(!sub.add_group(10));
        assert!(sub.add_group(20));
        assert_eq!(sub.groups, vec![10, 20]);
        assert!(sub.remove_group(10));
        assert!(!sub.remove_group(10));
        assert_eq!(sub.groups, vec![20]);
    }
}
