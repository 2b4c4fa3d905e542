use crate::config::prompt::{ build_prompt, system_prompt };
use crate::ids::{ IdGenerator, UuidGenerator };
use crate::llm::chat::ChatClient;
use crate::llm::GenerationParams;
use crate::models::api::{ ChatRequest, ChatResponse, ReportRequest, ReportResponse };
use crate::server::error::ApiError;
use std::sync::Arc;
use axum::{
    body::Bytes,
    routing::{ get, post },
    Router,
    extract::{ Path, State },
    response::Html,
    Json,
};
use tower_http::cors::{ Any, CorsLayer };
use log::{ debug, info };

pub const REPORT_SUCCESS: &str = "Report generated successfully";

const INDEX_PAGE: &str = include_str!("static/index.html");

#[derive(Clone)]
pub struct AppState {
    chat_client: Arc<dyn ChatClient>,
    ids: Arc<dyn IdGenerator>,
    system_prompt: Arc<str>,
}

impl AppState {
    pub fn new(chat_client: Arc<dyn ChatClient>) -> Self {
        Self {
            chat_client,
            ids: Arc::new(UuidGenerator),
            system_prompt: Arc::from(system_prompt()),
        }
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route("/reports/{report_id}", get(report_page_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/reports", post(reports_handler))
        .layer(cors)
        .with_state(state)
}

async fn chat_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ChatResponse>, ApiError> {
    let req: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Chat(format!("Invalid request body: {}", e)))?;

    let history = req.chat_history.unwrap_or_default();
    let prompt = build_prompt(&state.system_prompt, &history, &req.message);
    debug!("Built prompt with {} prior turns ({} bytes)", history.len(), prompt.len());

    let completion = state.chat_client
        .complete(&prompt, GenerationParams::default()).await
        .map_err(|e| ApiError::Chat(e.to_string()))?;

    let conversation_id = match req.conversation_id {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = state.ids.mint();
            info!("Started conversation {}", id);
            id
        }
    };

    Ok(Json(ChatResponse {
        message: completion.response,
        conversation_id,
    }))
}

async fn reports_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ReportResponse>, ApiError> {
    let req: ReportRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Report(format!("Invalid request body: {}", e)))?;

    let report_id = state.ids.mint();
    info!(
        "Issued report {} for conversation {}",
        report_id,
        req.conversation_id.as_deref().unwrap_or("<none>")
    );

    Ok(Json(ReportResponse {
        report_id,
        message: REPORT_SUCCESS.to_string(),
    }))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_PAGE)
}

async fn report_page_handler(Path(report_id): Path<String>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Report {id}</title></head>\
         <body><h1>Healthcare AI Evaluation Report</h1><p>Report <code>{id}</code> has been requested. \
         Report content is not available yet.</p><p><a href=\"/\">Back to the evaluator</a></p></body></html>\n",
        id = escape_html(&report_id)
    ))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
