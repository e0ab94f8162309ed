use easy_ext::ext;
use teloxide::requests::Requester;
use teloxide::types::{Chat, Message, UpdateKind, User};
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

pub(crate) mod prelude {
    pub(crate) use super::{ChatExt as _, UpdateKindExt as _, UserExt as _, UtilRequesterExt as _};
}

#[ext(UserExt)]
pub(crate) impl User {
    fn debug_id(&self) -> String {
        let name = self.username.clone().unwrap_or_else(|| self.full_name());
        format!("{name} ({})", self.id)
    }
}

#[ext(ChatExt)]
pub(crate) impl Chat {
    fn debug_id(&self) -> String {
        let title = self
            .title()
            .or_else(|| self.username())
            .unwrap_or("{unknown_chat_title}");
        format!("{title} ({})", self.id)
    }
}

/// There is [`RequesterExt`] in [`teloxide::prelude`]. We name this symbol
/// different to avoid collisions.
///
/// [`RequesterExt`]: teloxide::prelude::RequesterExt
#[ext(UtilRequesterExt)]
pub(crate) impl<T: Requester> T {
    fn reply_to(&self, msg: &Message, text: impl Into<String>) -> T::SendMessage {
        use teloxide::payloads::SendMessageSetters;

        self.send_message(msg.chat.id, text)
            .reply_to_message_id(msg.id)
            .allow_sending_without_reply(true)
            .disable_web_page_preview(true)
    }

    fn reply_help<Cmd: BotCommands>(&self, msg: &Message) -> T::SendMessage {
        self.reply_to(msg, html::escape(&Cmd::descriptions().to_string()))
    }
}

#[ext(UpdateKindExt)]
pub(crate) impl UpdateKind {
    fn discriminator(&self) -> &'static str {
        macro_rules! stringify_enum {
            ($val:expr, $($variant:ident)*) => {
                match $val {$( UpdateKind::$variant(_) => stringify!($variant), )*}
            }
        }
        stringify_enum! {
            self,
            Message
            EditedMessage
            ChannelPost
            EditedChannelPost
            InlineQuery
            ChosenInlineResult
            CallbackQuery
            ShippingQuery
            PreCheckoutQuery
            Poll
            PollAnswer
            MyChatMember
            ChatMember
            ChatJoinRequest
            Error
        }
    }
}
