pub mod console;
pub mod events;

pub use console::ConsoleObserver;
pub use events::{ChannelObserver, RunEvent};
