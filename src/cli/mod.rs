use clap::Parser;
use crate::llm::{ LlmConfig, ModelRef, DEFAULT_CHAT_MODEL, DEFAULT_REPLICATE_BASE_URL };
use std::error::Error;
use url::Url;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Inference Provider Args ---
    /// API token for the Replicate inference service.
    #[arg(long, env = "REPLICATE_API_TOKEN", hide_env_values = true)]
    pub replicate_api_token: String,

    /// Base URL of the Replicate API.
    #[arg(long, env = "REPLICATE_BASE_URL", default_value = DEFAULT_REPLICATE_BASE_URL)]
    pub replicate_base_url: String,

    /// Hosted model used for the interview, as owner/name.
    #[arg(long, env = "CHAT_MODEL", default_value = DEFAULT_CHAT_MODEL)]
    pub chat_model: String,

    // --- General App Args ---
    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:3000")]
    pub server_addr: String,

    /// Optional path to the TLS certificate file (PEM format) for enabling HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn validate(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.replicate_api_token.trim().is_empty() {
            return Err("REPLICATE_API_TOKEN must not be empty".into());
        }
        self.chat_model.parse::<ModelRef>()?;
        Url::parse(&self.replicate_base_url)
            .map_err(|e| format!("Invalid Replicate base URL '{}': {}", self.replicate_base_url, e))?;
        Ok(())
    }

    pub fn llm_config(&self) -> LlmConfig {
        LlmConfig {
            api_key: Some(self.replicate_api_token.clone()),
            completion_model: Some(self.chat_model.clone()),
            base_url: Some(self.replicate_base_url.clone()),
        }
    }
}
