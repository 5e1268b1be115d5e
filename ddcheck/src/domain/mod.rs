//! Domain records and the subscription book.
//!
//! Subscriptions, recipient bindings and aliases are plain records; the
//! [`SubscriptionBook`] owns them, persists every mutation and hands out
//! immutable snapshots to readers.

mod book;
mod records;
mod subscription;

pub use book::{BookSnapshot, SubscriptionBook};
pub use subscription::{
    Alias, GroupId, RecipientBinding, SubscribeOutcome, Subscription, UnsubscribeOutcome, UserId,
};
