//! Chat transport adapters. Telegram is the only channel: a long-poll
//! receiver feeding the dispatcher, and a sendMessage notifier.

mod telegram;

pub use telegram::{TelegramNotifier, TelegramReceiver};
