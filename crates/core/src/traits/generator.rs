//! Response generation trait

use futures::Stream;
use std::pin::Pin;

use crate::{Message, Result};

/// One item from a response stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseToken {
    /// Next piece of response text
    Text(String),
    /// Generator finished the turn
    EndOfTurn,
}

/// Tokens for one response, terminated by [`ResponseToken::EndOfTurn`]
pub type TokenStream<'a> = Pin<Box<dyn Stream<Item = Result<ResponseToken>> + Send + 'a>>;

/// Language model that answers the conversation so far
///
/// Implementations:
/// - `ChatCompletionGenerator` - OpenAI / Azure OpenAI streaming chat completions
pub trait ResponseGenerator: Send + Sync + 'static {
    /// Stream a response to `messages`
    ///
    /// A stream that ends without `EndOfTurn` is a truncated response.
    fn generate(&self, messages: Vec<Message>) -> TokenStream<'_>;

    /// Get model name for logging
    fn model_name(&self) -> &str;
}
