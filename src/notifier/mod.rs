pub mod dispatcher;
pub mod message;
pub mod telegram;

pub use dispatcher::{DispatchStats, NotificationDispatcher};
pub use telegram::{LinkButton, MessagingSink, PhotoSource, SendOutcome, TelegramClient};
