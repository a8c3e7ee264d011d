//! OpenAI-compatible chat completion backend, blocking and streamed (SSE).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use carebot_shared::{CarebotError, GenerationConfig, GenerationRequest, Result};

use crate::http::{build_client, parse_endpoint, send_checked};
use crate::stream::{DEFAULT_STREAM_CAPACITY, FragmentSender, FragmentStream};
use crate::Responder;

/// Sampling options sent with every request.
#[derive(Debug, Clone)]
struct ChatOptions {
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Responder backed by a `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionResponder {
    client: Client,
    url: Url,
    api_key: Option<String>,
    options: ChatOptions,
}

impl ChatCompletionResponder {
    /// Build a responder for `model`. The API key is read from the configured
    /// env var when present; local servers usually need none.
    pub fn new(config: &GenerationConfig, model: impl Into<String>) -> Result<Self> {
        let base = config.base_url.trim_end_matches('/');
        let url = parse_endpoint(&format!("{base}/chat/completions"))?;
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty());

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url,
            api_key,
            options: ChatOptions {
                model: model.into(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
            },
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn body<'a>(&'a self, system: &'a str, request: &'a GenerationRequest, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.options.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            max_tokens: self.options.max_tokens,
            temperature: self.options.temperature,
            stream,
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let builder = self.client.post(self.url.clone());
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

#[async_trait]
impl Responder for ChatCompletionResponder {
    fn describe(&self) -> String {
        format!("{} @ {}", self.options.model, self.url)
    }

    #[instrument(skip_all, fields(model = %self.options.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let system = request.system_block();
        let body = self.body(&system, request, false);
        let response = send_checked(self.post().json(&body), &self.url).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CarebotError::parse(format!("{}: invalid completion body: {e}", self.url)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        debug!(chars = text.len(), "completion received");
        Ok(text)
    }

    #[instrument(skip_all, fields(model = %self.options.model))]
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream> {
        let system = request.system_block();
        let body = self.body(&system, request, true);
        let response = send_checked(self.post().json(&body), &self.url).await?;

        let (tx, stream) = FragmentStream::channel(DEFAULT_STREAM_CAPACITY);
        tokio::spawn(pump_sse(response, tx));
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// SSE decoding
// ---------------------------------------------------------------------------

/// What one SSE line contributes to the stream.
#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Decode one line of an OpenAI-style event stream.
fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return SseEvent::Skip;
    };
    match value["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseEvent::Fragment(content.to_string()),
        _ => SseEvent::Skip,
    }
}

/// Read the response body chunk by chunk and forward each content delta.
///
/// Stops at `[DONE]`, at end of body, or as soon as the consumer is gone,
/// even while waiting on a stalled upstream; dropping `response` then closes
/// the connection.
async fn pump_sse(mut response: reqwest::Response, tx: FragmentSender) {
    let mut buf: Vec<u8> = Vec::new();
    let mut fragments = 0usize;

    loop {
        let next = tokio::select! {
            next = response.chunk() => next,
            () = tx.closed() => {
                warn!(fragments, "stream consumer dropped, aborting generation");
                return;
            }
        };
        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                tx.fail(CarebotError::Network(format!("stream interrupted: {e}")))
                    .await;
                return;
            }
        };
        buf.extend_from_slice(&chunk);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            match parse_sse_line(&String::from_utf8_lossy(&line)) {
                SseEvent::Fragment(text) => {
                    fragments += 1;
                    if !tx.send(text).await {
                        warn!(fragments, "stream consumer dropped, aborting generation");
                        return;
                    }
                }
                SseEvent::Done => {
                    debug!(fragments, "stream complete");
                    return;
                }
                SseEvent::Skip => {}
            }
        }
    }

    // A final line without a trailing newline.
    if let SseEvent::Fragment(text) = parse_sse_line(&String::from_utf8_lossy(&buf)) {
        tx.send(text).await;
    }
    debug!(fragments, "stream ended without [DONE]");
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GenerationConfig {
        GenerationConfig {
            base_url: format!("{}/v1", server.uri()),
            api_key_env: "CAREBOT_TEST_UNSET_CHAT_KEY".into(),
            ..GenerationConfig::default()
        }
    }

    fn sse_body(fragments: &[&str]) -> String {
        let mut body = String::new();
        for fragment in fragments {
            let event = serde_json::json!({"choices": [{"delta": {"content": fragment}}]});
            body.push_str(&format!("data: {event}\n\n"));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[test]
    fn sse_lines_decode() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            SseEvent::Fragment("Hi".into())
        );
        assert_eq!(parse_sse_line("data: [DONE]"), SseEvent::Done);
        assert_eq!(parse_sse_line(": keep-alive"), SseEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            SseEvent::Skip
        );
    }

    #[tokio::test]
    async fn generate_returns_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "support-model",
                "stream": false,
                "messages": [
                    {"role": "system", "content": "Be warm."},
                    {"role": "user", "content": "I feel tired"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Rest when you can."}}]
            })))
            .mount(&server)
            .await;

        let responder = ChatCompletionResponder::new(&config_for(&server), "support-model")
            .unwrap()
            .with_api_key("secret");
        let text = responder
            .generate(&GenerationRequest::new("Be warm.", "I feel tired"))
            .await
            .unwrap();
        assert_eq!(text, "Rest when you can.");
    }

    #[tokio::test]
    async fn context_is_appended_to_system_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "messages": [{"role": "system", "content": "Expert.\n\nSource 1 (File: a.pdf):\nfolate\n"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let responder = ChatCompletionResponder::new(&config_for(&server), "m").unwrap();
        let request =
            GenerationRequest::new("Expert.", "q").with_context("Source 1 (File: a.pdf):\nfolate\n");
        assert_eq!(responder.generate(&request).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn generate_stream_yields_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["<|assistant|>", "You are ", "not alone."])),
            )
            .mount(&server)
            .await;

        let responder = ChatCompletionResponder::new(&config_for(&server), "m").unwrap();
        let stream = responder
            .generate_stream(&GenerationRequest::new("sys", "help"))
            .await
            .unwrap();
        assert_eq!(
            stream.collect_text().await.unwrap(),
            "<|assistant|>You are not alone."
        );
    }

    #[tokio::test]
    async fn dropped_stream_closes_stalled_connection() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let upstream = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 16 * 1024];
            let _ = socket.read(&mut request).await.unwrap();

            let event = "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n";
            let head = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\n\
                 transfer-encoding: chunked\r\n\r\n{:x}\r\n{event}\r\n",
                event.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();

            // Never finish the body; wait for the client to hang up.
            let mut rest = [0u8; 1024];
            loop {
                match socket.read(&mut rest).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        });

        let config = GenerationConfig {
            base_url: format!("http://{addr}/v1"),
            api_key_env: "CAREBOT_TEST_UNSET_CHAT_KEY".into(),
            ..GenerationConfig::default()
        };
        let responder = ChatCompletionResponder::new(&config, "m").unwrap();
        let mut stream = responder
            .generate_stream(&GenerationRequest::new("sys", "help"))
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "Hello");

        drop(stream);
        tokio::time::timeout(std::time::Duration::from_secs(5), upstream)
            .await
            .expect("connection closed after the consumer left")
            .unwrap();
    }

    #[tokio::test]
    async fn server_error_fails_before_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("out of memory"))
            .mount(&server)
            .await;

        let responder = ChatCompletionResponder::new(&config_for(&server), "m").unwrap();
        let err = responder
            .generate_stream(&GenerationRequest::new("sys", "help"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }
}
