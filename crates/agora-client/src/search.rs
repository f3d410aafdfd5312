//! Case-insensitive search over the messages currently loaded in the log.

use serde::Serialize;

use agora_shared::models::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "messages", rename_all = "camelCase")]
pub enum SearchOutcome {
    /// The term was empty after trimming.
    EnterTerm,
    NoResults,
    /// Matching messages, in log order.
    Matches(Vec<Message>),
}

impl SearchOutcome {
    pub fn matches(&self) -> &[Message] {
        match self {
            Self::Matches(found) => found,
            _ => &[],
        }
    }
}

/// Match `term` against message text or author display name. Only the
/// messages passed in are searched; nothing is fetched.
pub fn search<'a>(term: &str, messages: impl IntoIterator<Item = &'a Message>) -> SearchOutcome {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return SearchOutcome::EnterTerm;
    }

    let found: Vec<Message> = messages
        .into_iter()
        .filter(|m| {
            m.text.to_lowercase().contains(&needle)
                || m.author_display_name.to_lowercase().contains(&needle)
        })
        .cloned()
        .collect();

    if found.is_empty() {
        SearchOutcome::NoResults
    } else {
        SearchOutcome::Matches(found)
    }
}
