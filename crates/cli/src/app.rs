use std::io::Write;

use providers::relay::RelayClient;
use relay_core::llm::{ChatError, Conversation};
use tracing::{info, warn};

use crate::strings::{
    error_line, info_line, pod_status_line, APOLOGY, CANCELED_MARKER, HELP, PREFIX_ASSISTANT,
};

#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Continue,
    Quit,
}

/// One terminal chat session: the conversation so far and where replies
/// are printed.
pub struct App<W: Write> {
    client: RelayClient,
    convo: Conversation,
    out: W,
    /// Bytes of the in-flight reply already written to `out`.
    printed: usize,
}

impl<W: Write> App<W> {
    pub fn new(client: RelayClient, out: W) -> Self {
        Self {
            client,
            convo: Conversation::new(),
            out,
            printed: 0,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.convo
    }

    #[cfg(test)]
    pub fn out(&self) -> &W {
        &self.out
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{}", text);
        let _ = self.out.flush();
    }

    /// Returns `None` when `text` is not a slash command.
    pub async fn try_handle_slash_command(&mut self, text: &str) -> Option<Action> {
        let s = text.trim();
        let rest = s.strip_prefix('/')?;
        let mut parts = rest.splitn(2, char::is_whitespace);
        let cmd = parts.next().unwrap_or("").to_lowercase();
        let arg = parts.next().unwrap_or("").trim().to_lowercase();
        match cmd.as_str() {
            "new" => {
                self.convo.clear();
                info!(target: "cli", "conversation cleared");
                self.line(&info_line("new conversation"));
            }
            "pod" => match arg.as_str() {
                "start" => self.toggle_pod(true).await,
                "stop" => self.toggle_pod(false).await,
                _ => self.line(&error_line("usage: /pod start|stop")),
            },
            "quit" | "exit" => return Some(Action::Quit),
            _ => self.line(HELP),
        }
        Some(Action::Continue)
    }

    async fn toggle_pod(&mut self, start: bool) {
        match self.client.toggle_pod(start).await {
            Ok(data) => self.line(&pod_status_line(start, &data)),
            Err(e) => {
                warn!(target: "cli", "pod toggle failed: {}", e);
                self.line(&error_line(&e.to_string()));
            }
        }
    }

    /// Sends `text` as a user turn, printing only the newly added part of
    /// the reply as it grows. Pass the result to [`App::finish_turn`].
    pub async fn run_turn(&mut self, text: &str) -> Result<String, ChatError> {
        self.convo.push_user(text);
        self.printed = 0;
        let _ = write!(self.out, "{}", PREFIX_ASSISTANT);
        let _ = self.out.flush();
        let out = &mut self.out;
        let printed = &mut self.printed;
        self.client
            .stream_turn(self.convo.messages(), |partial| {
                if let Some(suffix) = partial.get(*printed..) {
                    let _ = write!(out, "{}", suffix);
                    let _ = out.flush();
                }
                *printed = partial.len();
            })
            .await
    }

    /// Records the outcome of a turn. Failed turns keep whatever text was
    /// already shown, mark it, and store a fixed apology as the reply.
    pub fn finish_turn(&mut self, res: Result<String, ChatError>) {
        match res {
            Ok(reply) => {
                self.line("");
                self.convo.push_assistant(reply);
            }
            Err(e) => {
                let marker = match e {
                    ChatError::Canceled => CANCELED_MARKER.to_string(),
                    ref other => error_line(&other.to_string()),
                };
                let sep = if self.printed > 0 { " " } else { "" };
                let _ = writeln!(self.out, "{}{}", sep, marker);
                self.line(&format!("{}{}", PREFIX_ASSISTANT, APOLOGY));
                warn!(target: "cli", "turn failed after {} bytes: {}", self.printed, e);
                self.convo.push_assistant(APOLOGY);
            }
        }
        self.printed = 0;
    }
}
