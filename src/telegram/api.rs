//! Minimal Telegram Bot API client over reqwest.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::trace;

use crate::common::error::{DispatchError, DispatchResult};
use crate::common::types::{ChatId, MessageId};
use crate::telegram::types::{ApiResponse, File, Message, Update, User};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Update kinds the relay consumes. Membership changes arrive as messages.
const ALLOWED_UPDATES: &[&str] = &["message", "edited_message", "channel_post", "edited_channel_post"];

/// Telegram Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramApi {
    client: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self::with_client(client, DEFAULT_API_BASE, token))
    }

    pub fn with_client(client: reqwest::Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into(),
            token: token.into(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base.trim_end_matches('/'), self.token, method)
    }

    /// Download URL of a file returned by `get_file`.
    pub fn file_url(&self, file: &File) -> Option<String> {
        file.file_path.as_ref().map(|path| {
            format!("{}/file/bot{}/{}", self.api_base.trim_end_matches('/'), self.token, path)
        })
    }

    async fn call<P, T>(&self, method: &str, payload: &P, timeout: Option<Duration>) -> DispatchResult<T>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        trace!(method, "Telegram API call");
        let mut request = self.client.post(self.url(method)).json(payload);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        // Error responses still carry a JSON envelope.
        let response: ApiResponse<T> = request.send().await?.json().await?;
        into_result(method, response)
    }

    pub async fn get_me(&self) -> DispatchResult<User> {
        self.call("getMe", &json!({}), None).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> DispatchResult<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ALLOWED_UPDATES,
        });
        self.call("getUpdates", &payload, Some(Duration::from_secs(timeout_secs + 10)))
            .await
    }

    pub async fn send_message(
        &self,
        chat_id: ChatId,
        thread_id: Option<ChatId>,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> DispatchResult<Message> {
        let mut payload = json!({
            "chat_id": chat_id,
            "text": html,
            "parse_mode": "HTML",
            "link_preview_options": {"is_disabled": true},
        });
        add_target(&mut payload, thread_id, reply_to);
        self.call("sendMessage", &payload, None).await
    }

    /// Send a file Telegram fetches from `url`, with an optional HTML caption.
    pub async fn send_document(
        &self,
        chat_id: ChatId,
        thread_id: Option<ChatId>,
        url: &str,
        caption: &str,
        reply_to: Option<MessageId>,
    ) -> DispatchResult<Message> {
        let mut payload = json!({
            "chat_id": chat_id,
            "document": url,
        });
        if !caption.is_empty() {
            payload["caption"] = json!(caption);
            payload["parse_mode"] = json!("HTML");
        }
        add_target(&mut payload, thread_id, reply_to);
        self.call("sendDocument", &payload, None).await
    }

    pub async fn edit_message_text(&self, chat_id: ChatId, message_id: MessageId, html: &str) -> DispatchResult<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": html,
            "parse_mode": "HTML",
            "link_preview_options": {"is_disabled": true},
        });
        match self.call::<_, Value>("editMessageText", &payload, None).await {
            Ok(_) => Ok(()),
            Err(DispatchError::Rejected { message }) if is_not_modified(&message) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> DispatchResult<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
        });
        self.call::<_, bool>("deleteMessage", &payload, None).await.map(|_| ())
    }

    pub async fn get_file(&self, file_id: &str) -> DispatchResult<File> {
        self.call("getFile", &json!({ "file_id": file_id }), None).await
    }
}

fn add_target(payload: &mut Value, thread_id: Option<ChatId>, reply_to: Option<MessageId>) {
    if let Some(thread_id) = thread_id {
        payload["message_thread_id"] = json!(thread_id);
    }
    if let Some(reply_to) = reply_to {
        payload["reply_parameters"] = json!({
            "message_id": reply_to,
            "allow_sending_without_reply": true,
        });
    }
}

fn into_result<T>(method: &str, response: ApiResponse<T>) -> DispatchResult<T> {
    if response.ok {
        return response
            .result
            .ok_or_else(|| DispatchError::rejected(format!("{}: response without result", method)));
    }
    let description = response.description.unwrap_or_else(|| "unknown error".to_string());
    let method = match response.error_code {
        Some(code) => format!("{} ({})", method, code),
        None => method.to_string(),
    };
    Err(classify(&method, &description))
}

fn classify(method: &str, description: &str) -> DispatchError {
    let message = format!("{}: {}", method, description);
    if description.to_lowercase().contains("not found") {
        DispatchError::not_found(message)
    } else {
        DispatchError::rejected(message)
    }
}

fn is_not_modified(message: &str) -> bool {
    message.contains("message is not modified")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api() -> TelegramApi {
        TelegramApi::with_client(reqwest::Client::new(), "https://tg.example/", "123:abc")
    }

    #[test]
    fn test_urls() {
        let api = api();
        assert_eq!(api.url("getMe"), "https://tg.example/bot123:abc/getMe");
        let file = File {
            file_path: Some("photos/file_1.jpg".to_string()),
        };
        assert_eq!(
            api.file_url(&file).as_deref(),
            Some("https://tg.example/file/bot123:abc/photos/file_1.jpg")
        );
    }

    #[test]
    fn test_error_classification() {
        let missing: ApiResponse<bool> = ApiResponse {
            ok: false,
            result: None,
            description: Some("Bad Request: message to edit not found".to_string()),
            error_code: Some(400),
        };
        assert!(into_result("editMessageText", missing).unwrap_err().is_not_found());

        let refused: ApiResponse<bool> = ApiResponse {
            ok: false,
            result: None,
            description: Some("Forbidden: bot was kicked from the group chat".to_string()),
            error_code: Some(403),
        };
        let err = into_result("sendMessage", refused).unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { .. }));
        assert!(err.to_string().contains("sendMessage"));
    }

    #[test]
    fn test_not_modified_detection() {
        let err = classify(
            "editMessageText",
            "Bad Request: message is not modified: specified new message content and reply markup are exactly the same",
        );
        match err {
            DispatchError::Rejected { message } => assert!(is_not_modified(&message)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_reply_and_thread_target() {
        let mut payload = json!({"chat_id": 1});
        add_target(&mut payload, Some(44), Some(9));
        assert_eq!(payload["message_thread_id"], 44);
        assert_eq!(payload["reply_parameters"]["message_id"], 9);

        let mut plain = json!({"chat_id": 1});
        add_target(&mut plain, None, None);
        assert!(plain.get("reply_parameters").is_none());
    }
}
