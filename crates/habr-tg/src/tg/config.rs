use serde::Deserialize;
use teloxide::types::{ChatId, UserId};

#[derive(Deserialize, Clone)]
pub(crate) struct Config {
    pub(crate) token: String,

    /// ID of the user who maintains the bot and has access to the
    /// maintainer commands
    pub(crate) maintainer: UserId,

    /// Comma-separated IDs of the chats the bot talks to. For private chats
    /// they are the same as the user IDs. Empty means everyone is allowed.
    #[serde(default)]
    pub(crate) allowed_users: Vec<i64>,
}

impl Config {
    /// The maintainer is always allowed
    pub(crate) fn is_allowed(&self, chat: ChatId) -> bool {
        self.allowed_users.is_empty()
            || self.allowed_users.contains(&chat.0)
            || u64::try_from(chat.0).is_ok_and(|id| UserId(id) == self.maintainer)
    }
}
