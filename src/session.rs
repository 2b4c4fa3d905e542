//! Client side of the interview: the turn log a chat page holds, and the
//! submit/export loop it runs against the HTTP API.

use crate::models::api::{ ChatRequest, ChatResponse, ErrorResponse, ReportRequest, ReportResponse };
use crate::models::chat::{ Conversation, Turn };
use async_trait::async_trait;
use log::{ error, info, warn };
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use thiserror::Error;

pub const APOLOGY: &str = "Sorry, I encountered an error. Please try again.";

/// Number of turns that must be exceeded before a report can be requested.
pub const EXPORT_THRESHOLD: usize = 5;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned {status}: {message}")]
    Server {
        status: u16,
        message: String,
    },
    #[error("Nothing to export: no conversation identifier has been issued yet")]
    NoConversation,
}

#[async_trait]
pub trait EvaluatorApi: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, Box<dyn StdError + Send + Sync>>;
    async fn request_report(
        &self,
        request: &ReportRequest
    ) -> Result<ReportResponse, Box<dyn StdError + Send + Sync>>;
}

/// Talks to a running evaluator server over HTTP.
pub struct HttpEvaluatorApi {
    http: HttpClient,
    base_url: String,
}

impl HttpEvaluatorApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            base_url: base_url.into(),
        }
    }

    async fn post<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        route: &str,
        body: &Req
    ) -> Result<Resp, SessionError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), route);
        let resp = self.http.post(&url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorResponse>().await
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            return Err(SessionError::Server { status: status.as_u16(), message });
        }
        Ok(resp.json::<Resp>().await?)
    }
}

#[async_trait]
impl EvaluatorApi for HttpEvaluatorApi {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, Box<dyn StdError + Send + Sync>> {
        Ok(self.post("/api/chat", request).await?)
    }

    async fn request_report(
        &self,
        request: &ReportRequest
    ) -> Result<ReportResponse, Box<dyn StdError + Send + Sync>> {
        Ok(self.post("/api/reports", request).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

pub struct ChatSession<A: EvaluatorApi> {
    api: A,
    conversation: Conversation,
    state: SessionState,
}

/// An unanswered user turn. Whatever happens to the request, the turn gets an
/// assistant reply and the session returns to idle when this is dropped.
struct PendingReply<'a> {
    conversation: &'a mut Conversation,
    state: &'a mut SessionState,
    answered: bool,
}

impl<'a> PendingReply<'a> {
    fn begin(conversation: &'a mut Conversation, state: &'a mut SessionState, input: &str) -> Self {
        conversation.push(Turn::user(input));
        *state = SessionState::AwaitingResponse;
        Self { conversation, state, answered: false }
    }

    fn answer(mut self, reply: String) {
        self.conversation.push(Turn::assistant(reply));
        self.answered = true;
    }
}

impl Drop for PendingReply<'_> {
    fn drop(&mut self) {
        if !self.answered {
            warn!("Chat request abandoned before a reply arrived");
            self.conversation.push(Turn::assistant(APOLOGY));
        }
        *self.state = SessionState::Idle;
    }
}

impl<A: EvaluatorApi> ChatSession<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            conversation: Conversation::new(),
            state: SessionState::Idle,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        self.conversation.turns()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.id.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sends one user message and records the reply. Returns false when the
    /// input was blank and nothing happened.
    ///
    /// A failed call still records an assistant turn carrying [`APOLOGY`].
    /// Dropping the future before it completes does the same, and the
    /// session goes back to [`SessionState::Idle`].
    pub async fn submit(&mut self, input: &str) -> bool {
        if input.trim().is_empty() {
            return false;
        }

        let request = ChatRequest {
            message: input.to_string(),
            conversation_id: self.conversation.id.clone(),
            chat_history: Some(self.conversation.turns().to_vec()),
        };
        let pending = PendingReply::begin(&mut self.conversation, &mut self.state, input);

        let reply = match self.api.chat(&request).await {
            Ok(resp) => {
                pending.conversation.adopt_id(&resp.conversation_id);
                resp.message
            }
            Err(e) => {
                error!("Error: {}", e);
                APOLOGY.to_string()
            }
        };

        pending.answer(reply);
        true
    }

    pub fn can_export(&self) -> bool {
        self.conversation.len() > EXPORT_THRESHOLD && self.conversation.id.is_some()
    }

    /// Requests a report and returns the path of the view that shows it.
    pub async fn export(&self) -> Result<String, Box<dyn StdError + Send + Sync>> {
        let conversation_id = self.conversation.id.clone().ok_or(SessionError::NoConversation)?;
        let resp = self.api
            .request_report(&ReportRequest { conversation_id: Some(conversation_id) }).await?;
        info!("Report {} requested", resp.report_id);
        Ok(format!("/reports/{}", resp.report_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingApi {
        fail_chat: bool,
        hang_chat: bool,
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl EvaluatorApi for RecordingApi {
        async fn chat(
            &self,
            request: &ChatRequest
        ) -> Result<ChatResponse, Box<dyn StdError + Send + Sync>> {
            self.requests.lock().unwrap().push(request.clone());
            if self.hang_chat {
                std::future::pending::<()>().await;
            }
            if self.fail_chat {
                return Err(Box::new(io::Error::new(io::ErrorKind::Other, "offline")));
            }
            let n = self.requests.lock().unwrap().len();
            Ok(ChatResponse {
                message: format!("reply {}", n),
                conversation_id: format!("conv-{}", n),
            })
        }

        async fn request_report(
            &self,
            request: &ReportRequest
        ) -> Result<ReportResponse, Box<dyn StdError + Send + Sync>> {
            Ok(ReportResponse {
                report_id: format!("report-for-{}", request.conversation_id.as_deref().unwrap_or("")),
                message: "Report generated successfully".into(),
            })
        }
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut session = ChatSession::new(RecordingApi::default());
        assert!(!session.submit("   ").await);
        assert!(session.turns().is_empty());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn submit_sends_prior_history_and_adopts_first_id() {
        let mut session = ChatSession::new(RecordingApi::default());
        assert!(session.submit("We want to predict sepsis risk").await);
        assert!(session.submit("It targets ICU patients").await);

        assert_eq!(session.conversation_id(), Some("conv-1"));
        assert_eq!(
            session.turns(),
            &[
                Turn::user("We want to predict sepsis risk"),
                Turn::assistant("reply 1"),
                Turn::user("It targets ICU patients"),
                Turn::assistant("reply 2")
            ]
        );

        let requests = session.api.requests.lock().unwrap();
        assert_eq!(requests[0].conversation_id, None);
        assert_eq!(requests[0].chat_history.as_deref(), Some(&[][..]));
        assert_eq!(requests[1].conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(requests[1].chat_history.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn failed_call_appends_apology() {
        let api = RecordingApi { fail_chat: true, ..RecordingApi::default() };
        let mut session = ChatSession::new(api);
        session.submit("hello").await;
        assert_eq!(session.turns()[1], Turn::assistant(APOLOGY));
        assert!(session.conversation_id().is_none());
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn abandoned_submit_returns_to_idle_with_apology() {
        let api = RecordingApi { hang_chat: true, ..RecordingApi::default() };
        let mut session = ChatSession::new(api);

        let outcome = tokio::time::timeout(Duration::from_millis(20), session.submit("hello")).await;
        assert!(outcome.is_err());

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.turns(), &[Turn::user("hello"), Turn::assistant(APOLOGY)]);
    }

    #[tokio::test]
    async fn export_unlocks_after_five_turns() {
        let mut session = ChatSession::new(RecordingApi::default());
        for msg in ["one", "two"] {
            session.submit(msg).await;
        }
        assert!(!session.can_export());
        session.submit("three").await;
        assert_eq!(session.turns().len(), 6);
        assert!(session.can_export());
        assert_eq!(session.export().await.unwrap(), "/reports/report-for-conv-1");
    }

    #[tokio::test]
    async fn export_without_id_fails() {
        let session = ChatSession::new(RecordingApi::default());
        assert!(session.export().await.is_err());
    }
}
