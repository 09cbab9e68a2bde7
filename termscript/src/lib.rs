//! # Termscript
//!
//! Async session engine for automating a remote shell over a single duplex
//! character stream, such as a serial console or a terminal pass-through.
//!
//! Termscript decides when a command's response has completed, recovers an
//! unauthenticated console through a login handshake, and can switch the
//! same stream into a byte-oriented file transfer.
//!
//! ## Features
//!
//! - Background character capture into an unbounded queue (tokio task)
//! - Regex completion matching against the line in progress, with echo
//!   suppression and backspace editing
//! - Bounded-retry login handshake
//! - Side-channel UI protocol for alerts, menus and transfer markers
//! - Optional JSON transcript of commands and responses
//! - XMODEM transfers through a timed byte adapter
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use termscript::{SecretString, SessionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), termscript::Error> {
//!     let mut session = SessionBuilder::new()
//!         .command_timeout(Duration::from_secs(10))
//!         .build_stdio()
//!         .await?;
//!
//!     let password = SecretString::from("root".to_string());
//!     if session.login("root", &password).await?.is_success() {
//!         if let Some(lines) = session.cmd("uname -a").await? {
//!             session.alert(&lines.join(" "))?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod transfer;
pub mod ui;

// Re-export main types for convenience
pub use config::{SessionConfig, TransferConfig};
pub use driver::{LoginOutcome, Menu, Recorder, Session, SessionBuilder};
pub use error::{Error, Result};
pub use secrecy::SecretString;
pub use transfer::{ByteTransfer, TimedByteIo, TransferProtocol, Xmodem};
pub use ui::{UiMessage, UiSink};
