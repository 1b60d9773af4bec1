use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emoji -> ids of the users who applied it.
///
/// Serialized as a plain JSON object, e.g. `{"👍": ["<uuid>"]}`. A user id
/// appears under an emoji at most once and no emoji is kept with an empty
/// user list. Maps built through [`Reactions::toggle`] keep both properties;
/// maps read off the wire should go through [`Reactions::normalized`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reactions(BTreeMap<String, Vec<Uuid>>);

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle `user_id` under `emoji`. Returns `true` if the reaction was added.
    pub fn toggle(&mut self, emoji: &str, user_id: Uuid) -> bool {
        match self.0.get_mut(emoji) {
            Some(users) if users.contains(&user_id) => {
                users.retain(|id| *id != user_id);
                if users.is_empty() {
                    self.0.remove(emoji);
                }
                false
            }
            Some(users) => {
                users.push(user_id);
                true
            }
            None => {
                self.0.insert(emoji.to_string(), vec![user_id]);
                true
            }
        }
    }

    pub fn users(&self, emoji: &str) -> &[Uuid] {
        self.0.get(emoji).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, emoji: &str, user_id: Uuid) -> bool {
        self.users(emoji).contains(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Uuid])> {
        self.0.iter().map(|(emoji, users)| (emoji.as_str(), users.as_slice()))
    }

    /// Drop duplicate user ids and empty emoji entries.
    pub fn normalized(mut self) -> Self {
        self.0.retain(|_, users| {
            let mut seen = Vec::with_capacity(users.len());
            users.retain(|id| {
                if seen.contains(id) {
                    false
                } else {
                    seen.push(*id);
                    true
                }
            });
            !users.is_empty()
        });
        self
    }
}

impl FromIterator<(String, Vec<Uuid>)> for Reactions {
    fn from_iter<I: IntoIterator<Item = (String, Vec<Uuid>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect()).normalized()
    }
}
