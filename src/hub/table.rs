use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use crate::error::HubError;

use super::subscription::Subscription;

pub(crate) type SubscriberSet<M> = BTreeMap<String, Subscription<M>>;

/// Channel → subscriber name → subscription.
///
/// Both levels are ordered, so delivery order is lexicographic by subscriber
/// name. Channels never stay in the table empty.
pub(crate) struct ChannelTable<M> {
    channels: BTreeMap<String, SubscriberSet<M>>,
}

impl<M> ChannelTable<M> {
    pub fn new() -> Self {
        Self {
            channels: BTreeMap::new(),
        }
    }

    /// Registers `subscription`; a taken name leaves the table untouched.
    pub fn insert(&mut self, channel: &str, name: &str, subscription: Subscription<M>) -> Result<(), HubError> {
        let set = self.channels.entry(channel.to_string()).or_default();
        match set.entry(name.to_string()) {
            Entry::Occupied(_) => Err(HubError::DuplicateSubscription {
                channel: channel.to_string(),
                name: name.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(subscription);
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, channel: &str, name: &str) -> Option<Subscription<M>> {
        let set = self.channels.get_mut(channel)?;
        let removed = set.remove(name);
        if set.is_empty() {
            self.channels.remove(channel);
        }
        removed
    }

    pub fn remove_channel(&mut self, channel: &str) -> Option<SubscriberSet<M>> {
        self.channels.remove(channel)
    }

    pub fn take_all(&mut self) -> BTreeMap<String, SubscriberSet<M>> {
        std::mem::take(&mut self.channels)
    }

    pub fn subscribers(&self, channel: &str) -> Option<&SubscriberSet<M>> {
        self.channels.get(channel)
    }

    pub fn contains(&self, channel: &str, name: &str) -> bool {
        self.channels.get(channel).is_some_and(|set| set.contains_key(name))
    }

    pub fn len(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, BTreeMap::len)
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}
