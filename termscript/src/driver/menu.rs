//! Numbered menus shown over the side channel.

use std::time::Duration;

use log::{debug, trace};

use super::session::Session;
use crate::error::Result;
use crate::ui::UiMessage;

/// Default title line.
const DEFAULT_TITLE: &str = "=== Menu ===";

/// Default prompt line.
const DEFAULT_PROMPT: &str = "Select > ";

/// Input arriving this soon after the menu is shown is discarded.
const SETTLE_WINDOW: Duration = Duration::from_millis(500);

/// How long to wait for a selection.
const SELECT_TIMEOUT: Duration = Duration::from_secs(60);

/// An ordered list of labelled actions.
///
/// # Example
///
/// ```rust
/// use termscript::Menu;
///
/// let menu = Menu::new()
///     .item("Get uname", "uname -a")
///     .item("Reboot", "reboot");
///
/// assert_eq!(menu.select("2").map(|(label, _)| label), Some("Reboot"));
/// ```
#[derive(Debug, Clone)]
pub struct Menu<A> {
    title: String,
    prompt: String,
    items: Vec<(String, A)>,
}

impl<A> Menu<A> {
    pub fn new() -> Self {
        Self {
            title: DEFAULT_TITLE.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            items: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    /// Append an item. Items are numbered from 1 in insertion order.
    pub fn item(mut self, label: impl Into<String>, action: A) -> Self {
        self.items.push((label.into(), action));
        self
    }

    /// Look up the item whose 1-based number is `input`.
    pub fn select(&self, input: &str) -> Option<(&str, &A)> {
        let index: usize = input.trim().parse().ok()?;
        let (label, action) = self.items.get(index.checked_sub(1)?)?;
        Some((label.as_str(), action))
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<A> Default for Menu<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Show `menu` and wait for a selection on the main stream.
    ///
    /// Returns the chosen action, or `None` when the reply is not an item
    /// number or nothing arrives within 60 seconds.
    pub async fn show_menu<'m, A>(&mut self, menu: &'m Menu<A>) -> Result<Option<&'m A>> {
        self.emit_ui(UiMessage::MenuTitle, menu.title())?;
        for (idx, (label, _)) in menu.items.iter().enumerate() {
            self.emit_ui(UiMessage::MenuItem, &format!("{}: {}", idx + 1, label))?;
        }
        self.emit_ui(UiMessage::MenuPrompt, menu.prompt())?;

        self.flush_input(SETTLE_WINDOW).await?;
        let Some(reply) = self.read_line(Some(SELECT_TIMEOUT)).await? else {
            debug!("show_menu: no selection");
            return Ok(None);
        };

        match menu.select(&reply) {
            Some((label, action)) => {
                self.emit_ui(UiMessage::MenuSelected, &format!("Starting: {label}"))?;
                Ok(Some(action))
            }
            None => {
                debug!("show_menu: ignoring {:?}", reply);
                Ok(None)
            }
        }
    }

    fn emit_ui(&mut self, kind: UiMessage, text: &str) -> Result<()> {
        match self.ui_mut() {
            Some(ui) => ui.emit(kind, text)?,
            None => trace!("{:?} without ui sink: {}", kind, text),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;
    use crate::driver::SessionBuilder;
    use crate::ui::CaptureBuffer;

    #[derive(Debug, PartialEq)]
    enum Action {
        Uname,
        Reboot,
    }

    fn menu() -> Menu<Action> {
        Menu::new()
            .item("Get uname", Action::Uname)
            .item("Reboot", Action::Reboot)
    }

    #[test]
    fn test_select() {
        let menu = menu();
        assert_eq!(menu.select("1"), Some(("Get uname", &Action::Uname)));
        assert_eq!(menu.select(" 2 "), Some(("Reboot", &Action::Reboot)));
        assert_eq!(menu.select("0"), None);
        assert_eq!(menu.select("3"), None);
        assert_eq!(menu.select("reboot"), None);
    }

    #[test]
    fn test_defaults() {
        let menu: Menu<()> = Menu::default();
        assert_eq!(menu.title(), DEFAULT_TITLE);
        assert_eq!(menu.prompt(), DEFAULT_PROMPT);
        assert!(menu.is_empty());
    }

    #[tokio::test]
    async fn test_show_menu_dispatches_selection() {
        let capture = CaptureBuffer::default();
        let (mut remote, local) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(local);
        let mut session = SessionBuilder::new()
            .poll_interval(Duration::from_millis(50))
            .ui(capture.sink())
            .build(reader, writer)
            .await
            .unwrap();

        // Stale keystrokes are dropped by the settle window
        remote.write_all(b"1\r\n").await.unwrap();
        let typist = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            remote.write_all(b"2\r\n").await.unwrap();
            remote
        });

        let menu = menu().with_title("Tests");
        let chosen = session.show_menu(&menu).await.unwrap();
        assert_eq!(chosen, Some(&Action::Reboot));
        typist.await.unwrap();

        assert_eq!(
            capture.messages(),
            vec![
                (UiMessage::MenuTitle, "Tests".to_string()),
                (UiMessage::MenuItem, "1: Get uname".to_string()),
                (UiMessage::MenuItem, "2: Reboot".to_string()),
                (UiMessage::MenuPrompt, "Select > ".to_string()),
                (UiMessage::MenuSelected, "Starting: Reboot".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_show_menu_ignores_unknown_reply() {
        let capture = CaptureBuffer::default();
        let (mut remote, local) = tokio::io::duplex(256);
        let (reader, writer) = tokio::io::split(local);
        let mut session = SessionBuilder::new()
            .poll_interval(Duration::from_millis(50))
            .ui(capture.sink())
            .build(reader, writer)
            .await
            .unwrap();

        let typist = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(700)).await;
            remote.write_all(b"9\n").await.unwrap();
            remote
        });

        assert_eq!(session.show_menu(&menu()).await.unwrap(), None);
        typist.await.unwrap();
        assert!(
            capture
                .messages()
                .iter()
                .all(|(kind, _)| *kind != UiMessage::MenuSelected)
        );
    }
}
