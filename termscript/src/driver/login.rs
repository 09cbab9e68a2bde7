//! Login handshake for recovering an unauthenticated console.

use log::{debug, warn};
use secrecy::{ExposeSecret, SecretString};

use super::session::Session;
use crate::channel::{LoginPatterns, PromptClass};
use crate::error::Result;

/// Position in the login handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeState {
    /// Nudging the console for a login or shell prompt.
    AwaitPrompt,
    /// Username written, waiting for the password prompt.
    UsernameSent,
    /// Password written, waiting for the shell.
    PasswordSent,
    Authenticated,
    Failed,
}

/// Result of [`Session::login`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials were accepted, or the shell came up after the username.
    Authenticated,
    /// A shell prompt answered before any login prompt was seen. No
    /// credentials were sent.
    AlreadyAuthenticated,
    /// Retries ran out without reaching a shell.
    Failed,
}

impl LoginOutcome {
    /// Whether this session logged in during this call.
    ///
    /// `AlreadyAuthenticated` is not a success: the caller asked for a
    /// fresh login and the console was already at a shell.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

struct Handshake {
    state: HandshakeState,
    login_seen: bool,
}

impl Handshake {
    fn new() -> Self {
        Self {
            state: HandshakeState::AwaitPrompt,
            login_seen: false,
        }
    }

    fn transition(&mut self, next: HandshakeState) {
        if self.state != next {
            debug!("login: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }
}

impl Session {
    /// Log in on a console showing a getty prompt.
    ///
    /// Each attempt sends an empty line and waits up to the configured
    /// login timeout for `login: `, `Password: ` or the shell prompt, then
    /// answers the username and password prompts. A password prompt at the
    /// start of an attempt is left over from an earlier login and starts the
    /// next attempt. The wait for the shell after the password is bounded by
    /// the command timeout, or the login timeout when none is set. Attempts are bounded by the
    /// configured retry count. Errors are reserved for a closed stream or
    /// a failed write.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<LoginOutcome> {
        let patterns = LoginPatterns::new(&self.config().default_pattern)?;
        let step = Some(self.config().login_timeout);
        let retries = self.config().login_retries;
        let mut handshake = Handshake::new();

        for attempt in 1..=retries {
            handshake.transition(HandshakeState::AwaitPrompt);
            debug!("login: attempt {}/{}", attempt, retries);

            let prompt = self
                .command("", Some(&patterns.first_prompt), step, true)
                .await?
                .map(|lines| patterns.classify_response(&lines))
                .unwrap_or(PromptClass::None);

            match prompt {
                PromptClass::Login => {
                    handshake.login_seen = true;
                    handshake.transition(HandshakeState::UsernameSent);

                    let reply = self
                        .command(username, Some(&patterns.password_or_shell), step, true)
                        .await?
                        .map(|lines| patterns.classify_response(&lines))
                        .unwrap_or(PromptClass::None);

                    match reply {
                        PromptClass::Password => {
                            handshake.transition(HandshakeState::PasswordSent);
                            let timeout = self
                                .config()
                                .command_timeout
                                .or(Some(self.config().login_timeout));
                            if self
                                .command_hidden(password.expose_secret(), None, timeout)
                                .await?
                                .is_none()
                            {
                                warn!("login: no shell prompt after password");
                            }
                            handshake.transition(HandshakeState::Authenticated);
                            return Ok(LoginOutcome::Authenticated);
                        }
                        PromptClass::Shell => {
                            handshake.transition(HandshakeState::Authenticated);
                            return Ok(LoginOutcome::Authenticated);
                        }
                        PromptClass::Login | PromptClass::None => {}
                    }
                }
                PromptClass::Password => {
                    debug!("login: stale password prompt");
                }
                PromptClass::Shell if handshake.login_seen => {
                    handshake.transition(HandshakeState::Authenticated);
                    return Ok(LoginOutcome::Authenticated);
                }
                PromptClass::Shell => {
                    debug!("login: shell prompt before any login prompt");
                    handshake.transition(HandshakeState::Failed);
                    return Ok(LoginOutcome::AlreadyAuthenticated);
                }
                PromptClass::None => {}
            }
        }

        handshake.transition(HandshakeState::Failed);
        Ok(LoginOutcome::Failed)
    }
}
