//! # Per-subscriber message filter.
//!
//! A filter selects messages by `(message_type, channel)` pair:
//! - [`MessageFilter::All`]: every message;
//! - [`MessageFilter::Include`]: only listed pairs;
//! - [`MessageFilter::Exclude`]: everything except listed pairs.
//!
//! Inclusion and exclusion are exclusive; [`MessageFilter::new`] lets inclusion win
//! when both are supplied.

use std::collections::{HashMap, HashSet};

use crate::message::Channel;

/// Set of `(message_type, channel)` pairs, indexed by channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageKinds {
    by_channel: HashMap<Channel, HashSet<String>>,
}

impl MessageKinds {
    pub fn contains(&self, msg_type: &str, channel: Channel) -> bool {
        self.by_channel
            .get(&channel)
            .is_some_and(|types| types.contains(msg_type))
    }

    pub fn len(&self) -> usize {
        self.by_channel.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<S: Into<String>> FromIterator<(S, Channel)> for MessageKinds {
    fn from_iter<I: IntoIterator<Item = (S, Channel)>>(iter: I) -> Self {
        let mut by_channel: HashMap<Channel, HashSet<String>> = HashMap::new();
        for (msg_type, channel) in iter {
            by_channel.entry(channel).or_default().insert(msg_type.into());
        }
        Self { by_channel }
    }
}

/// Which messages a subscriber receives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MessageFilter {
    #[default]
    All,
    Include(MessageKinds),
    Exclude(MessageKinds),
}

impl MessageFilter {
    /// Builds a filter from optional inclusion and exclusion sets; inclusion wins.
    pub fn new(include: Option<MessageKinds>, exclude: Option<MessageKinds>) -> Self {
        match (include, exclude) {
            (Some(inc), _) => MessageFilter::Include(inc),
            (None, Some(exc)) => MessageFilter::Exclude(exc),
            (None, None) => MessageFilter::All,
        }
    }

    /// Only the listed pairs.
    pub fn include<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Channel)>,
    {
        MessageFilter::Include(pairs.into_iter().collect())
    }

    /// Everything but the listed pairs.
    pub fn exclude<S, I>(pairs: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator<Item = (S, Channel)>,
    {
        MessageFilter::Exclude(pairs.into_iter().collect())
    }

    /// True if a message of `msg_type` on `channel` passes this filter.
    pub fn matches(&self, msg_type: &str, channel: Channel) -> bool {
        match self {
            MessageFilter::All => true,
            MessageFilter::Include(kinds) => kinds.contains(msg_type, channel),
            MessageFilter::Exclude(kinds) => !kinds.contains(msg_type, channel),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn include_and_exclude_are_complements() {
        let inc = MessageFilter::include([("status", Channel::IOPub)]);
        let exc = MessageFilter::exclude([("status", Channel::IOPub)]);

        assert!(inc.matches("status", Channel::IOPub));
        assert!(!exc.matches("status", Channel::IOPub));

        assert!(!inc.matches("status", Channel::Shell));
        assert!(exc.matches("status", Channel::Shell));
        assert!(!inc.matches("stream", Channel::IOPub));
        assert!(exc.matches("execute_reply", Channel::Shell));
    }

    #[test]
    fn all_matches_everything() {
        assert!(MessageFilter::All.matches("anything", Channel::Stdin));
    }

    #[test]
    fn inclusion_wins_when_both_given() {
        let kinds: MessageKinds = [("status", Channel::IOPub)].into_iter().collect();
        let f = MessageFilter::new(Some(kinds.clone()), Some(kinds));
        assert!(matches!(f, MessageFilter::Include(_)));
        assert!(f.matches("status", Channel::IOPub));
    }
}
