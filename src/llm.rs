//! Multi-provider LLM adapter.
//!
//! The provider family is inferred from a substring of the endpoint URL, so
//! an operator can paste any endpoint and get sensible request shaping. The
//! dispatch table is kept in one place (`ProviderFamily::detect`); a new
//! family is a one-arm addition.
//!
//! Blocking calls always produce a user-facing string: provider failures are
//! mapped to Russian-language error messages rather than surfaced as errors,
//! because the reply goes straight back into the chat. Streaming is only
//! native on the OpenAI wire; other families fall back to one blocking call
//! emitted as a single chunk.

use crate::stats::RequestStats;
use crate::store::DatabaseRow;
use eventsource_stream::Eventsource;
use futures_util::{stream, Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Terminal sentinel of every chunk stream.
pub const STREAM_DONE: &str = "[DONE]";

pub const EMPTY_RESPONSE_MSG: &str = "Получен пустой ответ от AI сервиса.";
pub const CONNECTIVITY_ERROR_MSG: &str = "Ошибка соединения с AI сервисом. Попробуйте позже.";

pub fn status_error_msg(status: u16) -> String {
    format!("Ошибка AI сервиса: статус {}.", status)
}

/// Provider family inferred from the endpoint URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderFamily {
    Langdock,
    Anthropic,
    OpenAi,
    DeepSeek,
    Gemini,
    Generic,
}

impl ProviderFamily {
    /// Substring dispatch, first match wins.
    pub fn detect(api_url: &str) -> Self {
        if api_url.contains("langdock.com") {
            Self::Langdock
        } else if api_url.contains("anthropic.com") {
            Self::Anthropic
        } else if api_url.contains("openai.com") {
            Self::OpenAi
        } else if api_url.contains("deepseek.com") {
            Self::DeepSeek
        } else if api_url.contains("googleapis.com") || api_url.contains("generativelanguage") {
            Self::Gemini
        } else {
            Self::Generic
        }
    }

    /// Families speaking the OpenAI chat-completions wire format.
    pub fn openai_wire(&self) -> bool {
        matches!(self, Self::OpenAi | Self::DeepSeek | Self::Generic)
    }

    /// Native SSE streaming is only supported on the OpenAI wire.
    pub fn supports_streaming(&self) -> bool {
        self.openai_wire()
    }
}

/// One chat call: settings straight from the bot row plus the composed
/// system prompt and rolling history.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: Option<String>,
    /// Chronological `(user, assistant)` exchanges.
    pub history: Vec<(String, String)>,
    pub user_message: String,
}

enum CallError {
    Status(u16),
    Network(String),
    Empty,
}

pub struct LlmClient {
    http: reqwest::Client,
    stats: Arc<RequestStats>,
}

impl LlmClient {
    pub fn new(stats: Arc<RequestStats>) -> Self {
        Self {
            http: reqwest::Client::new(),
            stats,
        }
    }

    /// Blocking call. Always returns text fit to send to the chat.
    pub async fn chat(&self, req: &ChatRequest) -> String {
        self.stats.record_api_call();
        map_outcome(self.call(req, false).await)
    }

    /// Streaming call: yields content chunks, then the `[DONE]` sentinel.
    pub async fn chat_stream(
        &self,
        req: ChatRequest,
    ) -> Pin<Box<dyn Stream<Item = String> + Send>> {
        self.stats.record_api_call();
        let family = ProviderFamily::detect(&req.api_url);

        if !family.supports_streaming() {
            // One blocking call emitted as a single chunk.
            let text = map_outcome(self.call(&req, false).await);
            return Box::pin(stream::iter(vec![text, STREAM_DONE.to_string()]));
        }

        let url = request_url(family, &req.api_url, &req.api_key);
        let body = build_body(family, &req, true);
        let builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .bearer_auth(&req.api_key)
            .json(&body);

        let response = match builder.send().await {
            Ok(resp) => resp,
            Err(e) => {
                warn!("LLM stream connect failed: {}", e);
                return Box::pin(stream::iter(vec![
                    CONNECTIVITY_ERROR_MSG.to_string(),
                    STREAM_DONE.to_string(),
                ]));
            }
        };

        if !response.status().is_success() {
            let msg = status_error_msg(response.status().as_u16());
            return Box::pin(stream::iter(vec![msg, STREAM_DONE.to_string()]));
        }

        let chunks = response
            .bytes_stream()
            .eventsource()
            .take_while(|event| {
                let done = match event {
                    Ok(e) => e.data.trim() == STREAM_DONE,
                    Err(_) => true,
                };
                futures_util::future::ready(!done)
            })
            .filter_map(|event| {
                let text = event.ok().and_then(|e| {
                    serde_json::from_str::<Value>(&e.data).ok().and_then(|v| {
                        v["choices"][0]["delta"]["content"]
                            .as_str()
                            .map(String::from)
                    })
                });
                futures_util::future::ready(text)
            });

        Box::pin(chunks.chain(stream::iter(vec![STREAM_DONE.to_string()])))
    }

    async fn call(&self, req: &ChatRequest, streaming: bool) -> Result<String, CallError> {
        let family = ProviderFamily::detect(&req.api_url);
        let url = request_url(family, &req.api_url, &req.api_key);
        let body = build_body(family, req, streaming);

        debug!(
            "LLM call: family={:?}, model={}, history={} exchanges",
            family,
            req.model,
            req.history.len()
        );

        let mut builder = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);

        // Gemini authenticates via the key query parameter instead.
        if family != ProviderFamily::Gemini {
            builder = builder.bearer_auth(&req.api_key);
        }
        if family == ProviderFamily::Anthropic {
            builder = builder.header("anthropic-version", ANTHROPIC_VERSION);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("LLM call failed: status {}", status);
            return Err(CallError::Status(status.as_u16()));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| CallError::Network(e.to_string()))?;

        match extract_text(family, &value) {
            Some(text) if !text.trim().is_empty() => Ok(text),
            _ => Err(CallError::Empty),
        }
    }
}

fn map_outcome(result: Result<String, CallError>) -> String {
    match result {
        Ok(text) => text,
        Err(CallError::Status(code)) => status_error_msg(code),
        Err(CallError::Network(e)) => {
            warn!("LLM network error: {}", e);
            CONNECTIVITY_ERROR_MSG.to_string()
        }
        Err(CallError::Empty) => EMPTY_RESPONSE_MSG.to_string(),
    }
}

/// Final request URL for a family: OpenAI-wire endpoints get
/// `/chat/completions` appended when absent, Gemini gets the key query
/// parameter appended exactly once.
pub(crate) fn request_url(family: ProviderFamily, api_url: &str, api_key: &str) -> String {
    match family {
        f if f.openai_wire() => {
            if api_url.contains("/chat/completions") {
                api_url.to_string()
            } else {
                format!("{}/chat/completions", api_url.trim_end_matches('/'))
            }
        }
        ProviderFamily::Gemini => {
            if api_url.contains("key=") {
                api_url.to_string()
            } else if api_url.contains('?') {
                format!("{}&key={}", api_url, api_key)
            } else {
                format!("{}?key={}", api_url, api_key)
            }
        }
        _ => api_url.to_string(),
    }
}

pub(crate) fn build_body(family: ProviderFamily, req: &ChatRequest, streaming: bool) -> Value {
    match family {
        ProviderFamily::Langdock | ProviderFamily::Anthropic => {
            let mut messages = Vec::new();
            for (user, assistant) in &req.history {
                messages.push(json!({"role": "user", "content": user}));
                messages.push(json!({"role": "assistant", "content": assistant}));
            }
            messages.push(json!({"role": "user", "content": req.user_message}));

            let mut body = json!({
                "model": req.model,
                "max_tokens": DEFAULT_MAX_TOKENS,
                "temperature": DEFAULT_TEMPERATURE,
                "messages": messages,
            });
            if let Some(system) = &req.system_prompt {
                body["system"] = json!(system);
            }
            body
        }
        ProviderFamily::Gemini => {
            // System prompt and history are flattened into the user content.
            let mut text = String::new();
            if let Some(system) = &req.system_prompt {
                text.push_str(system);
                text.push_str("\n\n");
            }
            for (user, assistant) in &req.history {
                text.push_str(&format!("User: {}\nAssistant: {}\n", user, assistant));
            }
            text.push_str(&format!("User: {}", req.user_message));

            json!({
                "contents": [{"parts": [{"text": text}]}],
                "generationConfig": {
                    "maxOutputTokens": DEFAULT_MAX_TOKENS,
                    "temperature": DEFAULT_TEMPERATURE,
                },
            })
        }
        _ => {
            let mut messages = Vec::new();
            if let Some(system) = &req.system_prompt {
                messages.push(json!({"role": "system", "content": system}));
            }
            for (user, assistant) in &req.history {
                messages.push(json!({"role": "user", "content": user}));
                messages.push(json!({"role": "assistant", "content": assistant}));
            }
            messages.push(json!({"role": "user", "content": req.user_message}));

            json!({
                "model": req.model,
                "max_tokens": DEFAULT_MAX_TOKENS,
                "temperature": DEFAULT_TEMPERATURE,
                "stream": streaming,
                "messages": messages,
            })
        }
    }
}

pub(crate) fn extract_text(family: ProviderFamily, value: &Value) -> Option<String> {
    let non_empty = |s: &str| {
        if s.is_empty() {
            None
        } else {
            Some(s.to_string())
        }
    };

    match family {
        ProviderFamily::Langdock => value["content"][0]["text"]
            .as_str()
            .or_else(|| value["message"]["content"].as_str())
            .and_then(non_empty),
        ProviderFamily::Anthropic => value["content"][0]["text"].as_str().and_then(non_empty),
        ProviderFamily::OpenAi | ProviderFamily::DeepSeek => value["choices"][0]["message"]
            ["content"]
            .as_str()
            .and_then(non_empty),
        ProviderFamily::Gemini => value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .and_then(non_empty),
        ProviderFamily::Generic => value["choices"][0]["message"]["content"]
            .as_str()
            .or_else(|| value["content"][0]["text"].as_str())
            .or_else(|| value["response"].as_str())
            .or_else(|| value["text"].as_str())
            .or_else(|| value["content"].as_str())
            .and_then(non_empty),
    }
}

/// System prompt seen by the provider: the bot's own prompt plus the
/// knowledge base injected verbatim with a format label.
pub fn compose_system_prompt(base: Option<&str>, database: Option<&DatabaseRow>) -> Option<String> {
    let mut prompt = base.unwrap_or_default().to_string();

    if let Some(db) = database {
        if !db.content.is_empty() {
            match db.db_type.as_str() {
                "json" => {
                    prompt.push_str("\n\nДанные из базы (JSON):\n");
                    prompt.push_str(&db.content);
                }
                _ => {
                    prompt.push_str("\n\nБаза знаний:\n");
                    prompt.push_str(&db.content);
                }
            }
        }
    }

    if prompt.is_empty() {
        None
    } else {
        Some(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> (LlmClient, Arc<RequestStats>) {
        let stats = Arc::new(RequestStats::new());
        (LlmClient::new(stats.clone()), stats)
    }

    fn request(api_url: &str) -> ChatRequest {
        ChatRequest {
            api_url: api_url.to_string(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            system_prompt: Some("Ты ассистент.".to_string()),
            history: vec![],
            user_message: "привет".to_string(),
        }
    }

    #[test]
    fn test_family_detection() {
        assert_eq!(
            ProviderFamily::detect("https://api.langdock.com/anthropic/eu/v1/messages"),
            ProviderFamily::Langdock
        );
        assert_eq!(
            ProviderFamily::detect("https://api.anthropic.com/v1/messages"),
            ProviderFamily::Anthropic
        );
        assert_eq!(
            ProviderFamily::detect("https://api.openai.com/v1"),
            ProviderFamily::OpenAi
        );
        assert_eq!(
            ProviderFamily::detect("https://api.deepseek.com"),
            ProviderFamily::DeepSeek
        );
        assert_eq!(
            ProviderFamily::detect("https://generativelanguage.googleapis.com/v1beta/models/x"),
            ProviderFamily::Gemini
        );
        assert_eq!(
            ProviderFamily::detect("http://localhost:8080/v1"),
            ProviderFamily::Generic
        );
    }

    #[test]
    fn test_openai_url_rewrite() {
        assert_eq!(
            request_url(ProviderFamily::OpenAi, "https://api.openai.com/v1", "k"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            request_url(
                ProviderFamily::OpenAi,
                "https://api.openai.com/v1/chat/completions",
                "k"
            ),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_gemini_key_appended_exactly_once() {
        let url = request_url(ProviderFamily::Gemini, "https://g/models/x:generateContent", "k1");
        assert_eq!(url, "https://g/models/x:generateContent?key=k1");

        // Already keyed: untouched.
        assert_eq!(
            request_url(ProviderFamily::Gemini, &url, "k2"),
            "https://g/models/x:generateContent?key=k1"
        );
    }

    #[test]
    fn test_openai_body_puts_system_first() {
        let mut req = request("https://api.openai.com/v1");
        req.history = vec![("hi".to_string(), "hello".to_string())];
        let body = build_body(ProviderFamily::OpenAi, &req, false);

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[3]["content"], "привет");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn test_anthropic_body_separate_system_field() {
        let req = request("https://api.anthropic.com/v1/messages");
        let body = build_body(ProviderFamily::Anthropic, &req, false);

        assert_eq!(body["system"], "Ты ассистент.");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
    }

    #[test]
    fn test_gemini_body_flattens_history() {
        let mut req = request("https://generativelanguage.googleapis.com/x");
        req.history = vec![("q1".to_string(), "a1".to_string())];
        let body = build_body(ProviderFamily::Gemini, &req, false);

        let text = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("Ты ассистент."));
        assert!(text.contains("User: q1\nAssistant: a1"));
        assert!(text.ends_with("User: привет"));
    }

    #[test]
    fn test_generic_extraction_fallback_chain() {
        let f = ProviderFamily::Generic;
        assert_eq!(
            extract_text(f, &serde_json::json!({"choices":[{"message":{"content":"a"}}]})),
            Some("a".to_string())
        );
        assert_eq!(
            extract_text(f, &serde_json::json!({"content":[{"text":"b"}]})),
            Some("b".to_string())
        );
        assert_eq!(
            extract_text(f, &serde_json::json!({"response":"c"})),
            Some("c".to_string())
        );
        assert_eq!(
            extract_text(f, &serde_json::json!({"text":"d"})),
            Some("d".to_string())
        );
        assert_eq!(
            extract_text(f, &serde_json::json!({"content":"e"})),
            Some("e".to_string())
        );
        assert_eq!(extract_text(f, &serde_json::json!({"other":"x"})), None);
    }

    #[test]
    fn test_compose_system_prompt_with_knowledge() {
        let db = DatabaseRow {
            id: "d1".to_string(),
            name: "kb".to_string(),
            db_type: "text".to_string(),
            description: None,
            content: "часы работы 9-18".to_string(),
            size: 0,
            created_at: String::new(),
            updated_at: String::new(),
        };

        let composed = compose_system_prompt(Some("Ты бот."), Some(&db)).unwrap();
        assert!(composed.starts_with("Ты бот."));
        assert!(composed.contains("\n\nБаза знаний:\nчасы работы 9-18"));

        let mut json_db = db.clone();
        json_db.db_type = "json".to_string();
        json_db.content = "{}".to_string();
        let composed = compose_system_prompt(None, Some(&json_db)).unwrap();
        assert!(composed.contains("Данные из базы (JSON):\n{}"));

        assert_eq!(compose_system_prompt(None, None), None);

        let mut empty_db = db;
        empty_db.content = String::new();
        assert_eq!(compose_system_prompt(None, Some(&empty_db)), None);
    }

    #[tokio::test]
    async fn test_blocking_call_on_openai_wire() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ответ"}}]
            })))
            .mount(&server)
            .await;

        let (client, stats) = client();
        let reply = client.chat(&request(&format!("{}/v1", server.uri()))).await;
        assert_eq!(reply, "ответ");
        assert_eq!(stats.api_calls(), 1);
    }

    #[tokio::test]
    async fn test_anthropic_version_header_sent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "из Клода"}]
            })))
            .mount(&server)
            .await;

        // Family detection is a substring match, so the path carries it.
        let (client, _) = client();
        let url = format!("{}/anthropic.com/v1/messages", server.uri());
        let reply = client.chat(&request(&url)).await;
        assert_eq!(reply, "из Клода");
    }

    #[tokio::test]
    async fn test_gemini_key_in_query_no_auth_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "от Gemini"}]}}]
            })))
            .mount(&server)
            .await;

        let (client, _) = client();
        let url = format!("{}/generativelanguage/models/g", server.uri());
        let reply = client.chat(&request(&url)).await;
        assert_eq!(reply, "от Gemini");

        let received = server.received_requests().await.unwrap();
        assert!(!received[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_provider_error_status_named_in_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (client, _) = client();
        let reply = client.chat(&request(&server.uri())).await;
        assert!(reply.contains("500"), "got: {}", reply);
    }

    #[tokio::test]
    async fn test_empty_response_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": ""}}]
            })))
            .mount(&server)
            .await;

        let (client, _) = client();
        let reply = client.chat(&request(&server.uri())).await;
        assert_eq!(reply, EMPTY_RESPONSE_MSG);
    }

    #[tokio::test]
    async fn test_network_failure_message() {
        let (client, _) = client();
        // Nothing listens here.
        let reply = client.chat(&request("http://127.0.0.1:1/v1")).await;
        assert_eq!(reply, CONNECTIVITY_ERROR_MSG);
    }

    #[tokio::test]
    async fn test_streaming_openai_wire() {
        let sse = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"При\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"вет\"}}]}\n\n",
            "data: [DONE]\n\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let (client, _) = client();
        let chunks: Vec<String> = client
            .chat_stream(request(&server.uri()))
            .await
            .collect()
            .await;

        assert_eq!(chunks, vec!["При", "вет", STREAM_DONE]);
    }

    #[tokio::test]
    async fn test_streaming_fallback_for_non_streaming_family() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "целиком"}]
            })))
            .mount(&server)
            .await;

        let (client, stats) = client();
        let url = format!("{}/langdock.com/v1/messages", server.uri());
        let chunks: Vec<String> = client.chat_stream(request(&url)).await.collect().await;

        assert_eq!(chunks, vec!["целиком", STREAM_DONE]);
        assert_eq!(stats.api_calls(), 1);
    }
}
