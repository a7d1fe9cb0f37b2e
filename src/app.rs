use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::client::ChatClient;

/// Transient bot message shown while a reply is pending, overwritten in place.
pub const THINKING_PLACEHOLDER: &str = "Thinking...";
/// Final bot text when the server answers with a blank or missing result.
pub const EMPTY_REPLY: &str = "Sorry, no response received.";
/// Final bot text when the request fails (transport error or bad status).
pub const FAILED_REPLY: &str = "Failed to get response from server.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Bot,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Input state
    pub input: String,
    pub input_cursor: usize, // cursor position in input, in chars

    // Conversation state
    pub chat_messages: Vec<ChatMessage>,
    pub chat_scroll: u16,
    pub chat_height: u16, // Height of chat area for scroll calculations
    pub chat_width: u16,  // Width of chat area for wrap calculations

    // Outstanding reply, if any. The placeholder at `pending_reply` is
    // overwritten once the task settles; submission is gated while Some.
    pub reply_task: Option<JoinHandle<Result<String>>>,
    pub pending_reply: Option<usize>,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    pub client: ChatClient,
}

impl App {
    pub fn new(client: ChatClient) -> Self {
        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            input: String::new(),
            input_cursor: 0,

            chat_messages: Vec::new(),
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,

            reply_task: None,
            pending_reply: None,

            animation_frame: 0,

            client,
        }
    }

    /// True from submission until the reply (or error) has been rendered.
    pub fn is_waiting(&self) -> bool {
        self.reply_task.is_some()
    }

    /// Submit the current input. Ignored when the trimmed input is empty or
    /// a request is already outstanding (dropped, not queued).
    pub fn submit(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() || self.is_waiting() {
            return;
        }

        self.chat_messages.push(ChatMessage {
            role: ChatRole::User,
            content: text,
        });
        self.chat_messages.push(ChatMessage {
            role: ChatRole::Bot,
            content: THINKING_PLACEHOLDER.to_string(),
        });
        self.pending_reply = Some(self.chat_messages.len() - 1);

        self.input.clear();
        self.input_cursor = 0;

        // History is rebuilt after the user message is appended, so the new
        // question is included while the placeholder is not.
        let conversation = self.history();
        let client = self.client.clone();
        self.reply_task = Some(tokio::spawn(async move {
            client.send(&conversation).await
        }));

        // Scroll to bottom so "Thinking..." is visible
        self.scroll_to_bottom();
    }

    /// The conversation as sent to the server: every message in order,
    /// skipping any whose content equals the placeholder sentinel.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.chat_messages
            .iter()
            .filter(|msg| msg.content != THINKING_PLACEHOLDER)
            .cloned()
            .collect()
    }

    /// Check the outstanding reply task and, once it has settled, render the
    /// result. Called on every tick; a no-op while the task is still running.
    pub async fn poll_reply(&mut self) {
        if !self.reply_task.as_ref().is_some_and(|task| task.is_finished()) {
            return;
        }
        if let Some(task) = self.reply_task.take() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(anyhow::anyhow!(e)),
            };
            self.finish_reply(outcome);
        }
    }

    /// Overwrite the placeholder with the settled reply and re-enable input.
    /// Failures collapse to fixed sentinel text; nothing propagates further.
    pub fn finish_reply(&mut self, outcome: Result<String>) {
        let reply = match outcome {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => EMPTY_REPLY.to_string(),
            Err(e) => {
                tracing::error!("chat request failed: {e:#}");
                FAILED_REPLY.to_string()
            }
        };

        if let Some(idx) = self.pending_reply.take() {
            if let Some(msg) = self.chat_messages.get_mut(idx) {
                msg.content = reply;
            }
        }

        self.input_mode = InputMode::Editing;
        self.scroll_to_bottom();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.is_waiting() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    // Chat scrolling
    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    pub fn scroll_half_page_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(self.chat_height / 2);
    }

    pub fn scroll_half_page_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(self.chat_height / 2);
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
    }

    /// Total rendered lines of the conversation at the current chat width.
    /// Mirrors how the panel lays messages out: one role line, the wrapped
    /// content lines, and a blank line after each message.
    pub fn chat_line_count(&self) -> u16 {
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        let mut total_lines: u16 = 0;
        for msg in &self.chat_messages {
            total_lines += 1; // Role line ("You:" or "Bot:")
            for line in msg.content.lines() {
                // Use character count, not byte length, for proper UTF-8 handling
                let char_count = line.chars().count();
                if char_count == 0 {
                    total_lines += 1; // Empty line still takes one line
                } else {
                    total_lines += ((char_count / wrap_width) + 1) as u16;
                }
            }
            total_lines += 1; // Blank line after message
        }
        total_lines
    }

    /// Scroll the panel so the newest entry is visible.
    pub fn scroll_to_bottom(&mut self) {
        let total_lines = self.chat_line_count();
        let visible_height = if self.chat_height > 0 {
            self.chat_height
        } else {
            20
        };

        if total_lines > visible_height {
            self.chat_scroll = total_lines - visible_height;
        } else {
            self.chat_scroll = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_server::{http_response, spawn_once};
    use std::time::Duration;

    fn test_app() -> App {
        // Port 9 (discard) is never listening; requests fail fast.
        App::new(ChatClient::new("http://127.0.0.1:9"))
    }

    fn never_settling_task() -> JoinHandle<Result<String>> {
        tokio::spawn(async { std::future::pending::<Result<String>>().await })
    }

    async fn wait_for_reply(app: &mut App) {
        for _ in 0..500 {
            app.poll_reply().await;
            if !app.is_waiting() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("reply never settled");
    }

    #[tokio::test]
    async fn submit_appends_user_message_and_placeholder() {
        let mut app = test_app();
        app.input = "Hello".to_string();
        app.submit();

        assert_eq!(app.chat_messages.len(), 2);
        assert_eq!(app.chat_messages[0].role, ChatRole::User);
        assert_eq!(app.chat_messages[0].content, "Hello");
        assert_eq!(app.chat_messages[1].role, ChatRole::Bot);
        assert_eq!(app.chat_messages[1].content, THINKING_PLACEHOLDER);
        assert!(app.is_waiting());
        assert!(app.input.is_empty());
        assert_eq!(app.input_cursor, 0);
    }

    #[tokio::test]
    async fn submit_trims_surrounding_whitespace() {
        let mut app = test_app();
        app.input = "  Hello  ".to_string();
        app.submit();

        assert_eq!(app.chat_messages[0].content, "Hello");
    }

    #[test]
    fn submitting_blank_input_is_a_noop() {
        let mut app = test_app();
        for input in ["", "   ", "\t\n"] {
            app.input = input.to_string();
            app.submit();
        }

        assert!(app.chat_messages.is_empty());
        assert!(!app.is_waiting());
    }

    #[tokio::test]
    async fn submitting_while_waiting_is_dropped() {
        let mut app = test_app();
        app.input = "first".to_string();
        app.submit();
        assert_eq!(app.chat_messages.len(), 2);

        app.input = "second".to_string();
        app.submit();

        assert_eq!(app.chat_messages.len(), 2);
        assert!(app.is_waiting());
        // The dropped attempt leaves the input untouched.
        assert_eq!(app.input, "second");
    }

    #[test]
    fn history_skips_placeholder_and_preserves_order() {
        let mut app = test_app();
        app.chat_messages = vec![
            ChatMessage {
                role: ChatRole::User,
                content: "Hello".to_string(),
            },
            ChatMessage {
                role: ChatRole::Bot,
                content: "Hi there".to_string(),
            },
            ChatMessage {
                role: ChatRole::User,
                content: "How are you?".to_string(),
            },
            ChatMessage {
                role: ChatRole::Bot,
                content: THINKING_PLACEHOLDER.to_string(),
            },
        ];

        let history = app.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "Hello");
        assert_eq!(history[1].content, "Hi there");
        assert_eq!(history[2].content, "How are you?");
        assert!(history.iter().all(|m| m.content != THINKING_PLACEHOLDER));
    }

    #[test]
    fn finish_reply_overwrites_placeholder() {
        let mut app = test_app();
        app.chat_messages = vec![
            ChatMessage {
                role: ChatRole::User,
                content: "Hello".to_string(),
            },
            ChatMessage {
                role: ChatRole::Bot,
                content: THINKING_PLACEHOLDER.to_string(),
            },
        ];
        app.pending_reply = Some(1);
        app.input_mode = InputMode::Normal;

        app.finish_reply(Ok("Hi there".to_string()));

        assert_eq!(app.chat_messages.len(), 2);
        assert_eq!(app.chat_messages[1].content, "Hi there");
        assert_eq!(app.pending_reply, None);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[test]
    fn finish_reply_maps_blank_result_to_empty_sentinel() {
        let mut app = test_app();
        app.chat_messages = vec![ChatMessage {
            role: ChatRole::Bot,
            content: THINKING_PLACEHOLDER.to_string(),
        }];
        app.pending_reply = Some(0);

        app.finish_reply(Ok("   ".to_string()));

        assert_eq!(app.chat_messages[0].content, EMPTY_REPLY);
    }

    #[test]
    fn finish_reply_maps_error_to_failure_sentinel() {
        let mut app = test_app();
        app.chat_messages = vec![ChatMessage {
            role: ChatRole::Bot,
            content: THINKING_PLACEHOLDER.to_string(),
        }];
        app.pending_reply = Some(0);

        app.finish_reply(Err(anyhow::anyhow!("connection refused")));

        assert_eq!(app.chat_messages[0].content, FAILED_REPLY);
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[tokio::test]
    async fn successful_cycle_renders_the_reply() {
        let base = spawn_once(http_response("200 OK", r#"{"result":"Hi there"}"#)).await;
        let mut app = App::new(ChatClient::new(&base));
        app.input = "Hello".to_string();
        app.submit();

        wait_for_reply(&mut app).await;

        assert_eq!(app.chat_messages.len(), 2);
        assert_eq!(app.chat_messages[1].content, "Hi there");
        assert!(!app.is_waiting());
        assert_eq!(app.input_mode, InputMode::Editing);
    }

    #[tokio::test]
    async fn blank_result_cycle_renders_the_empty_sentinel() {
        let base = spawn_once(http_response("200 OK", r#"{"result":""}"#)).await;
        let mut app = App::new(ChatClient::new(&base));
        app.input = "Hello".to_string();
        app.submit();

        wait_for_reply(&mut app).await;

        assert_eq!(app.chat_messages[1].content, EMPTY_REPLY);
    }

    #[tokio::test]
    async fn server_error_cycle_renders_the_failure_sentinel() {
        let base = spawn_once(http_response(
            "500 Internal Server Error",
            r#"{"error":"boom"}"#,
        ))
        .await;
        let mut app = App::new(ChatClient::new(&base));
        app.input = "Hello".to_string();
        app.submit();

        wait_for_reply(&mut app).await;

        assert_eq!(app.chat_messages[1].content, FAILED_REPLY);
        assert!(!app.is_waiting());
    }

    #[tokio::test]
    async fn unreachable_server_cycle_renders_the_failure_sentinel() {
        let mut app = test_app();
        app.input = "Hello".to_string();
        app.submit();

        wait_for_reply(&mut app).await;

        assert_eq!(app.chat_messages[1].content, FAILED_REPLY);
    }

    #[tokio::test]
    async fn poll_reply_is_a_noop_while_the_task_runs() {
        let mut app = test_app();
        app.chat_messages = vec![ChatMessage {
            role: ChatRole::Bot,
            content: THINKING_PLACEHOLDER.to_string(),
        }];
        app.pending_reply = Some(0);
        app.reply_task = Some(never_settling_task());

        app.poll_reply().await;

        assert!(app.is_waiting());
        assert_eq!(app.chat_messages[0].content, THINKING_PLACEHOLDER);
    }

    #[test]
    fn tick_animation_only_advances_while_waiting() {
        let mut app = test_app();
        app.tick_animation();
        assert_eq!(app.animation_frame, 0);
    }

    #[test]
    fn chat_line_count_wraps_long_messages() {
        let mut app = test_app();
        app.chat_width = 10;
        app.chat_messages = vec![ChatMessage {
            role: ChatRole::User,
            content: "a".repeat(25),
        }];

        // Role line + three wrapped lines + trailing blank line.
        assert_eq!(app.chat_line_count(), 5);
    }

    #[test]
    fn scroll_to_bottom_pins_the_newest_entry() {
        let mut app = test_app();
        app.chat_width = 40;
        app.chat_height = 5;
        for i in 0..10 {
            app.chat_messages.push(ChatMessage {
                role: ChatRole::User,
                content: format!("message {i}"),
            });
        }

        app.scroll_to_bottom();
        assert_eq!(app.chat_scroll, app.chat_line_count() - 5);

        app.chat_messages.truncate(1);
        app.scroll_to_bottom();
        assert_eq!(app.chat_scroll, 0);
    }

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage {
            role: ChatRole::Bot,
            content: "Hi".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"role":"bot","content":"Hi"}"#);
    }
}
