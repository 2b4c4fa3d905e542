pub mod replicate;

use async_trait::async_trait;
use futures::{ Stream, StreamExt, Future };
use serde::Deserialize;
use std::error::Error as StdError;
use std::pin::Pin;
use std::sync::Arc;
use super::{ GenerationParams, LlmConfig };
use self::replicate::ReplicateChatClient;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type FragmentStream = Pin<
    Box<dyn Stream<Item = Result<String, Box<dyn StdError + Send + Sync>>> + Send>
>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a completion and yields the model output as it arrives.
    async fn stream_completion(
        &self,
        prompt: &str,
        params: GenerationParams
    ) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>>;

    /// Runs a completion to the end and joins every fragment.
    async fn complete(
        &self,
        prompt: &str,
        params: GenerationParams
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let stream = self.stream_completion(prompt, params).await?;
        let response = collect_fragments(stream).await?;
        Ok(CompletionResponse { response })
    }

    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;
}

pub async fn collect_fragments(
    mut stream: FragmentStream
) -> Result<String, Box<dyn StdError + Send + Sync>> {
    let mut response = String::new();
    while let Some(fragment) = stream.next().await {
        response.push_str(&fragment?);
    }
    Ok(response)
}

pub fn create_streaming_response<F, Fut>(
    response_fn: F
) -> Result<FragmentStream, Box<dyn StdError + Send + Sync>>
where
    F: FnOnce(mpsc::Sender<Result<String, Box<dyn StdError + Send + Sync>>>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Ok(Box::pin(ReceiverStream::new(rx)))
}

pub fn fragments_as_stream(fragments: Vec<String>) -> FragmentStream {
    Box::pin(futures::stream::iter(fragments.into_iter().map(Ok)))
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client = ReplicateChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
