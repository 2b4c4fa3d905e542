pub mod cli;
pub mod config;
pub mod ids;
pub mod llm;
pub mod models;
pub mod server;
pub mod session;

use cli::Args;
use llm::chat::new_client as new_chat_client;
use log::info;
use server::api::AppState;
use server::Server;
use std::error::Error;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    args.validate()?;

    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Inference Provider: Replicate ({})", args.replicate_base_url);
    info!("Chat Model: {}", args.chat_model);
    info!("Max Tokens: {}, Temperature: {}", llm::MAX_TOKENS, llm::TEMPERATURE);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let chat_client = new_chat_client(&args.llm_config())?;
    info!(
        "Chat client configured: Model={}, BaseURL={}",
        chat_client.get_model(),
        chat_client.get_base_url().as_deref().unwrap_or("adapter default")
    );

    let state = AppState::new(chat_client);
    let server = Server::new(args.server_addr.clone(), state, args.clone());
    server.run().await?;

    Ok(())
}
