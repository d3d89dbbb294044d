//! Event type filtering.

use std::collections::HashSet;

/// Decides which event types get forwarded.
pub trait EventTypeFilter: Send + Sync {
    /// Returns `true` if every event type should be forwarded.
    fn forward_all(&self) -> bool;

    /// Returns `true` if `event_type` is on the allow-list.
    fn is_allowed(&self, event_type: &str) -> bool;

    /// Returns every event type on the allow-list.
    fn allowed_types(&self) -> Vec<String>;

    /// Returns `true` if a record with the given event type should be forwarded.
    fn should_forward(&self, event_type: &str) -> bool {
        self.forward_all() || self.is_allowed(event_type)
    }
}

/// A fixed allow-list of event types.
#[derive(Clone, Debug, Default)]
pub struct AllowList {
    forward_all: bool,
    types: HashSet<String>,
}

impl AllowList {
    /// Creates an allow-list that matches exactly the given event types.
    pub fn new<I, S>(types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            forward_all: false,
            types: types.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates an allow-list that matches every event type.
    pub fn all() -> Self {
        Self {
            forward_all: true,
            types: HashSet::new(),
        }
    }

    /// Sets whether every event type should be matched, regardless of the listed types.
    pub fn with_forward_all(mut self, forward_all: bool) -> Self {
        self.forward_all = forward_all;
        self
    }
}

impl EventTypeFilter for AllowList {
    fn forward_all(&self) -> bool {
        self.forward_all
    }

    fn is_allowed(&self, event_type: &str) -> bool {
        self.types.contains(event_type)
    }

    fn allowed_types(&self) -> Vec<String> {
        let mut types = self.types.iter().cloned().collect::<Vec<_>>();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn allowed_types_are_sorted() {
        let list = AllowList::new(["http", "alert", "dns"]);
        assert_eq!(list.allowed_types(), vec!["alert", "dns", "http"]);
    }

    proptest! {
        #[test]
        fn property_forwarding_matches_membership(
            allowed in proptest::collection::hash_set("[a-z]{1,8}", 0..8),
            event_type in "[a-z]{1,8}",
            forward_all in any::<bool>(),
        ) {
            let list = AllowList::new(allowed.iter().cloned()).with_forward_all(forward_all);
            let expected = forward_all || allowed.contains(&event_type);
            prop_assert_eq!(list.should_forward(&event_type), expected);
        }
    }
}
