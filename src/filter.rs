use crate::event::ChatEvent;

/// Decides whether a canonical event qualifies for relay. The pipeline only
/// sees this trait, so the predicate can be swapped (regex, sender
/// allow-list) without touching acquisition or dispatch.
pub trait EventFilter: Send + Sync {
    fn accepts(&self, event: &ChatEvent) -> bool;
}

/// Default policy: drop self-sent and group messages, then require the
/// configured keyword somewhere in the text (case-insensitive).
pub struct KeywordFilter {
    keyword: String,
}

impl KeywordFilter {
    pub fn new(keyword: &str) -> Self {
        Self {
            keyword: keyword.to_lowercase(),
        }
    }
}

impl EventFilter for KeywordFilter {
    fn accepts(&self, event: &ChatEvent) -> bool {
        if event.from_self || event.from_group {
            return false;
        }
        event.text.to_lowercase().contains(&self.keyword)
    }
}
