use async_trait::async_trait;
use futures::StreamExt;
use log::{ debug, info, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use serde_json::Value as JsonValue;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::{ create_streaming_response, fragments_as_stream, ChatClient, FragmentStream };
use crate::llm::{ GenerationParams, LlmConfig, ModelRef, DEFAULT_CHAT_MODEL, DEFAULT_REPLICATE_BASE_URL };

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ReplicateError {
    #[error("Replicate configuration error: {0}")]
    InvalidConfig(String),
    #[error("Replicate request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Replicate API returned {status}: {body}")]
    Status {
        status: u16,
        body: String,
    },
    #[error("Replicate prediction failed: {0}")]
    PredictionFailed(String),
    #[error("Replicate prediction was canceled")]
    PredictionCanceled,
    #[error("Replicate stream error: {0}")]
    Stream(String),
    #[error("Unexpected prediction output: {0}")]
    MalformedOutput(String),
}

pub struct ReplicateChatClient {
    http: HttpClient,
    model: ModelRef,
    base_url: String,
    poll_interval: Duration,
}

#[derive(Serialize)]
struct PredictionRequest<'a> {
    stream: bool,
    input: PredictionInput<'a>,
}

#[derive(Serialize)]
struct PredictionInput<'a> {
    prompt: &'a str,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Debug, Clone)]
struct Prediction {
    #[serde(default)]
    id: String,
    status: PredictionStatus,
    #[serde(default)]
    output: Option<JsonValue>,
    #[serde(default)]
    error: Option<JsonValue>,
    #[serde(default)]
    urls: PredictionUrls,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

#[derive(Deserialize, Debug, Clone, Default)]
struct PredictionUrls {
    get: Option<String>,
    stream: Option<String>,
}

impl Prediction {
    fn failure_message(&self) -> String {
        match &self.error {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Null) | None => "unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// A server-sent event as emitted by Replicate's prediction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental SSE decoder; chunks may split events, line terminators and
/// UTF-8 sequences anywhere. Lines end with `\r\n`, `\n` or a lone `\r`.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    saw_field: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some((line_end, next)) = next_line_break(&self.buffer) {
            let line: Vec<u8> = self.buffer.drain(..next).take(line_end).collect();
            let line = String::from_utf8_lossy(&line).into_owned();
            if let Some(event) = self.feed_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if !self.saw_field {
                return None;
            }
            self.saw_field = false;
            return Some(SseEvent {
                event: self.event.take().unwrap_or_else(|| "message".to_string()),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "event" => {
                self.event = Some(value.to_string());
                self.saw_field = true;
            }
            "data" => {
                self.data.push(value.to_string());
                self.saw_field = true;
            }
            _ => {}
        }
        None
    }
}

/// Returns `(end of line content, start of next line)` for the first complete line.
/// A trailing `\r` is held back until we know whether `\n` follows it.
fn next_line_break(buf: &[u8]) -> Option<(usize, usize)> {
    let pos = buf.iter().position(|b| *b == b'\n' || *b == b'\r')?;
    if buf[pos] == b'\n' {
        return Some((pos, pos + 1));
    }
    match buf.get(pos + 1) {
        Some(b'\n') => Some((pos, pos + 2)),
        Some(_) => Some((pos, pos + 1)),
        None => None,
    }
}

#[derive(Deserialize, Debug, Default)]
struct DoneEvent {
    #[serde(default)]
    reason: Option<String>,
}

/// Maps the payload of a `done` event to the outcome of the prediction.
fn done_outcome(data: &str) -> Result<(), ReplicateError> {
    let done: DoneEvent = if data.trim().is_empty() {
        DoneEvent::default()
    } else {
        serde_json::from_str(data).map_err(|e|
            ReplicateError::Stream(format!("unreadable done event '{}': {}", data, e))
        )?
    };

    match done.reason.as_deref() {
        Some("canceled") => Err(ReplicateError::PredictionCanceled),
        Some("error") =>
            Err(ReplicateError::PredictionFailed("stream finished with reason 'error'".into())),
        _ => Ok(()),
    }
}

fn output_fragments(output: Option<&JsonValue>) -> Result<Vec<String>, ReplicateError> {
    match output {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::String(s)) => Ok(vec![s.clone()]),
        Some(JsonValue::Array(items)) =>
            items
                .iter()
                .map(|item| match item {
                    JsonValue::String(s) => Ok(s.clone()),
                    other => Err(ReplicateError::MalformedOutput(other.to_string())),
                })
                .collect(),
        Some(other) => Err(ReplicateError::MalformedOutput(other.to_string())),
    }
}

impl ReplicateChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let model: ModelRef = model.as_deref().unwrap_or(DEFAULT_CHAT_MODEL).parse()?;
        let base_url = base_url.unwrap_or_else(|| DEFAULT_REPLICATE_BASE_URL.to_string());
        Url::parse(&base_url).map_err(|e|
            ReplicateError::InvalidConfig(format!("Invalid base URL '{}': {}", base_url, e))
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
                ReplicateError::InvalidConfig(format!("Invalid API token format: {}", e))
            )?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            model,
            base_url,
            poll_interval: POLL_INTERVAL,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReplicateError::InvalidConfig("Replicate API token is required".into()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn predictions_url(&self) -> String {
        format!(
            "{}/v1/models/{}/{}/predictions",
            self.base_url.trim_end_matches('/'),
            self.model.owner,
            self.model.name
        )
    }

    fn prediction_url(&self, prediction: &Prediction) -> String {
        match &prediction.urls.get {
            Some(url) => url.clone(),
            None =>
                format!("{}/v1/predictions/{}", self.base_url.trim_end_matches('/'), prediction.id),
        }
    }

    async fn read_prediction(resp: reqwest::Response) -> Result<Prediction, ReplicateError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ReplicateError::Status { status: status.as_u16(), body });
        }
        Ok(resp.json::<Prediction>().await?)
    }

    async fn create_prediction(
        &self,
        prompt: &str,
        params: GenerationParams
    ) -> Result<Prediction, ReplicateError> {
        let req = PredictionRequest {
            stream: true,
            input: PredictionInput {
                prompt,
                max_tokens: params.max_tokens,
                temperature: params.temperature,
            },
        };

        let resp = self.http
            .post(self.predictions_url())
            .header("Prefer", "wait")
            .json(&req)
            .send().await?;

        Self::read_prediction(resp).await
    }

    async fn wait_for_prediction(
        &self,
        mut prediction: Prediction
    ) -> Result<Prediction, ReplicateError> {
        let url = self.prediction_url(&prediction);
        while
            matches!(prediction.status, PredictionStatus::Starting | PredictionStatus::Processing)
        {
            debug!("Prediction {} is {:?}, polling again", prediction.id, prediction.status);
            tokio::time::sleep(self.poll_interval).await;
            let resp = self.http.get(&url).send().await?;
            prediction = Self::read_prediction(resp).await?;
        }
        Ok(prediction)
    }

    fn settled_output(prediction: &Prediction) -> Result<Vec<String>, ReplicateError> {
        match prediction.status {
            PredictionStatus::Succeeded => output_fragments(prediction.output.as_ref()),
            PredictionStatus::Failed =>
                Err(ReplicateError::PredictionFailed(prediction.failure_message())),
            PredictionStatus::Canceled => Err(ReplicateError::PredictionCanceled),
            PredictionStatus::Starting | PredictionStatus::Processing =>
                Err(ReplicateError::MalformedOutput("prediction has not settled".into())),
        }
    }

    fn stream_events(&self, stream_url: String) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>> {
        let client = self.http.clone();
        info!("Starting Replicate stream request to {}", stream_url);

        create_streaming_response(move |tx| async move {
            let resp = match
                client
                    .get(&stream_url)
                    .header(ACCEPT, "text/event-stream")
                    .header(CACHE_CONTROL, "no-store")
                    .send().await
            {
                Ok(r) => r,
                Err(e) => {
                    let _ = tx.send(Err(Box::new(ReplicateError::from(e)) as _)).await;
                    return;
                }
            };

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let err = ReplicateError::Status { status: status.as_u16(), body };
                let _ = tx.send(Err(Box::new(err) as _)).await;
                return;
            }

            let mut parser = SseParser::new();
            let mut bytes = resp.bytes_stream();

            while let Some(chunk_result) = bytes.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(Box::new(ReplicateError::from(e)) as _)).await;
                        return;
                    }
                };

                for event in parser.push(&chunk) {
                    match event.event.as_str() {
                        "output" => {
                            if tx.send(Ok(event.data)).await.is_err() {
                                return;
                            }
                        }
                        "done" => {
                            if let Err(err) = done_outcome(&event.data) {
                                let _ = tx.send(Err(Box::new(err) as _)).await;
                            }
                            return;
                        }
                        "error" => {
                            let err = ReplicateError::Stream(event.data);
                            let _ = tx.send(Err(Box::new(err) as _)).await;
                            return;
                        }
                        other => debug!("Ignoring Replicate stream event '{}'", other),
                    }
                }
            }
            warn!("Replicate stream closed without a done event");
            let err = ReplicateError::Stream("stream ended without done event".into());
            let _ = tx.send(Err(Box::new(err) as _)).await;
        })
    }
}

#[async_trait]
impl ChatClient for ReplicateChatClient {
    async fn stream_completion(
        &self,
        prompt: &str,
        params: GenerationParams
    ) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>> {
        let prediction = self.create_prediction(prompt, params).await?;
        debug!("Created prediction {} with status {:?}", prediction.id, prediction.status);

        if
            matches!(prediction.status, PredictionStatus::Starting | PredictionStatus::Processing)
        {
            if let Some(stream_url) = prediction.urls.stream.clone() {
                return self.stream_events(stream_url);
            }
        }

        let prediction = self.wait_for_prediction(prediction).await?;
        let fragments = Self::settled_output(&prediction)?;
        Ok(fragments_as_stream(fragments))
    }

    fn get_model(&self) -> String {
        self.model.to_string()
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parser_handles_events_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: output\nda").is_empty());
        let events = parser.push(b"ta: Hello\n\nevent: done\ndata: {}\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent { event: "output".into(), data: "Hello".into() },
                SseEvent { event: "done".into(), data: "{}".into() }
            ]
        );
    }

    #[test]
    fn parser_joins_multiline_data_and_strips_crlf() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: output\r\ndata: line one\r\ndata: line two\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn parser_skips_comments_and_keeps_leading_spaces_after_first() {
        let mut parser = SseParser::new();
        let events = parser.push(b": keepalive\n\nevent: output\ndata:  indented\n\n");
        assert_eq!(events, vec![SseEvent { event: "output".into(), data: " indented".into() }]);
    }

    #[test]
    fn parser_survives_split_utf8() {
        let mut parser = SseParser::new();
        let bytes = "event: output\ndata: caf\u{e9}\n\n".as_bytes();
        let split = bytes.len() - 3;
        assert!(parser.push(&bytes[..split]).is_empty());
        let events = parser.push(&bytes[split..]);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[test]
    fn parser_waits_for_lf_after_trailing_cr() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: output\r\ndata: x\r").is_empty());
        let events = parser.push(b"\n\r\n");
        assert_eq!(events, vec![SseEvent { event: "output".into(), data: "x".into() }]);
    }

    #[test]
    fn parser_treats_lone_cr_as_line_break() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: output\rdata: one\rdata: two\r\rnext");
        assert_eq!(events, vec![SseEvent { event: "output".into(), data: "one\ntwo".into() }]);
    }

    #[test]
    fn parser_keeps_payload_bytes_between_terminators() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: output\r\ndata:   a\tb  \r\n\r\n");
        assert_eq!(events[0].data, "  a\tb  ");
    }

    #[test]
    fn done_reason_decides_outcome() {
        assert!(done_outcome("{}").is_ok());
        assert!(done_outcome("").is_ok());
        assert!(done_outcome(r#"{"reason":"succeeded"}"#).is_ok());
        assert!(matches!(
            done_outcome(r#"{"reason":"canceled"}"#),
            Err(ReplicateError::PredictionCanceled)
        ));
        assert!(matches!(
            done_outcome(r#"{"reason":"error"}"#),
            Err(ReplicateError::PredictionFailed(_))
        ));
        assert!(matches!(done_outcome("not json"), Err(ReplicateError::Stream(_))));
    }

    #[test]
    fn output_accepts_arrays_strings_and_null() {
        assert_eq!(output_fragments(Some(&json!(["a", "b"]))).unwrap(), vec!["a", "b"]);
        assert_eq!(output_fragments(Some(&json!("whole"))).unwrap(), vec!["whole"]);
        assert!(output_fragments(Some(&JsonValue::Null)).unwrap().is_empty());
        assert!(output_fragments(None).unwrap().is_empty());
    }

    #[test]
    fn output_rejects_non_text() {
        assert!(matches!(
            output_fragments(Some(&json!([1, 2]))),
            Err(ReplicateError::MalformedOutput(_))
        ));
        assert!(matches!(
            output_fragments(Some(&json!({ "text": "x" }))),
            Err(ReplicateError::MalformedOutput(_))
        ));
    }

    #[test]
    fn settled_output_maps_terminal_states() {
        let failed: Prediction = serde_json::from_value(
            json!({ "id": "p1", "status": "failed", "error": "out of memory" })
        ).unwrap();
        match ReplicateChatClient::settled_output(&failed) {
            Err(ReplicateError::PredictionFailed(msg)) => assert_eq!(msg, "out of memory"),
            other => panic!("unexpected {:?}", other),
        }

        let canceled: Prediction = serde_json::from_value(
            json!({ "id": "p2", "status": "canceled" })
        ).unwrap();
        assert!(matches!(
            ReplicateChatClient::settled_output(&canceled),
            Err(ReplicateError::PredictionCanceled)
        ));
    }

    #[test]
    fn from_config_requires_token() {
        let config = LlmConfig { api_key: Some("  ".into()), ..LlmConfig::default() };
        assert!(ReplicateChatClient::from_config(&config).is_err());
    }

    #[test]
    fn predictions_url_uses_model_path() {
        let client = ReplicateChatClient::new(
            "token".into(),
            None,
            Some("http://localhost:9999/".into())
        ).unwrap();
        assert_eq!(
            client.predictions_url(),
            "http://localhost:9999/v1/models/anthropic/claude-3-sonnet/predictions"
        );
        assert_eq!(client.get_model(), "anthropic/claude-3-sonnet");
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(ReplicateChatClient::new("token".into(), None, Some("not a url".into())).is_err());
    }
}
