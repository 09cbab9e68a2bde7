//! High-level session API for driving a remote shell.
//!
//! The driver layer turns the captured character stream into commands and
//! responses, and layers the login handshake, menu dispatch and transcript
//! recording on top of one [`Session`].

mod builder;
mod login;
mod menu;
mod recorder;
mod session;

pub use builder::SessionBuilder;
pub use login::LoginOutcome;
pub use menu::Menu;
pub use recorder::Recorder;
pub use session::Session;
