use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app::ChatMessage;

#[derive(Serialize)]
struct ChatRequest<'a> {
    conversation: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    result: Option<String>,
}

/// Client for the chat completion service: one JSON POST per exchange,
/// no retries, no timeout.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send the conversation and return the server's `result` text.
    /// A missing result field decodes as empty; callers decide what blank
    /// means. Non-2xx statuses and transport failures are errors.
    pub async fn send(&self, conversation: &[ChatMessage]) -> Result<String> {
        let url = format!("{}/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&ChatRequest { conversation })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "chat request to {} failed with status: {}",
                url,
                response.status()
            ));
        }

        let chat_response: ChatResponse = response.json().await?;
        Ok(chat_response.result.unwrap_or_default())
    }
}

/// One-shot canned HTTP fixture for exercising the client against real
/// sockets without standing up a server binary.
#[cfg(test)]
pub(crate) mod test_server {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    pub fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    /// Binds an ephemeral port, answers the first request with `response`,
    /// and returns the base URL to reach it.
    pub async fn spawn_once(response: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 16 * 1024];
            let mut read = 0;
            // Drain the request before answering so the client never sees a
            // reset while still writing its body.
            while read < buf.len() {
                let n = stream.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
                if request_complete(&buf[..read]) {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
        });

        format!("http://{addr}")
    }

    fn request_complete(bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let body_len = text
            .lines()
            .take_while(|line| !line.is_empty())
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") {
                    value.trim().parse::<usize>().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0);
        bytes.len() >= header_end + 4 + body_len
    }
}
