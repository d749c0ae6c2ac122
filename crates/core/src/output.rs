//! Output channel — where a persona's replies go.
//!
//! The host UI owns the channel. It accepts either a single string or a lazy
//! sequence of fragments, and must render fragments in the order they arrive.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use crate::error::TurnError;

/// A lazy, ordered sequence of reply fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, TurnError>> + Send>>;

/// Wrap a single string as a one-fragment stream.
pub fn single_fragment(text: impl Into<String>) -> FragmentStream {
    Box::pin(futures::stream::once(futures::future::ready(Ok(text.into()))))
}

/// The core OutputChannel trait.
#[async_trait]
pub trait OutputChannel: Send + Sync {
    /// Deliver one complete message.
    async fn send(&self, text: String);

    /// Deliver a message incrementally, fragment by fragment.
    ///
    /// Consumes the stream until it ends. An error item stops delivery and
    /// is returned; fragments delivered before it stay visible.
    async fn stream(&self, fragments: FragmentStream) -> Result<(), TurnError>;
}

/// One message as seen by a [`CollectingOutput`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Text(String),
    Stream {
        fragments: Vec<String>,
        error: Option<String>,
    },
}

impl Delivery {
    /// The full text of this delivery.
    pub fn text(&self) -> String {
        match self {
            Delivery::Text(t) => t.clone(),
            Delivery::Stream { fragments, .. } => fragments.concat(),
        }
    }
}

/// An output channel that records everything it receives.
///
/// Useful for tests and for hosts that render after the fact.
#[derive(Default)]
pub struct CollectingOutput {
    deliveries: Mutex<Vec<Delivery>>,
}

impl CollectingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far, in order.
    pub async fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().await.clone()
    }

    /// The text of every delivery, in order.
    pub async fn texts(&self) -> Vec<String> {
        self.deliveries
            .lock()
            .await
            .iter()
            .map(Delivery::text)
            .collect()
    }
}

#[async_trait]
impl OutputChannel for CollectingOutput {
    async fn send(&self, text: String) {
        self.deliveries.lock().await.push(Delivery::Text(text));
    }

    async fn stream(&self, mut fragments: FragmentStream) -> Result<(), TurnError> {
        let mut received = Vec::new();
        let mut outcome = Ok(());
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => received.push(fragment),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.deliveries.lock().await.push(Delivery::Stream {
            fragments: received,
            error: outcome.as_ref().err().map(|e| e.to_string()),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_text_and_streams_in_order() {
        let out = CollectingOutput::new();
        out.send("first".into()).await;
        out.stream(Box::pin(futures::stream::iter(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
        ])))
        .await
        .unwrap();
        out.stream(single_fragment("last")).await.unwrap();

        assert_eq!(out.texts().await, vec!["first", "ab", "last"]);
    }

    #[tokio::test]
    async fn stream_error_keeps_partial_fragments() {
        let out = CollectingOutput::new();
        let result = out
            .stream(Box::pin(futures::stream::iter(vec![
                Ok("partial ".to_string()),
                Err(TurnError::Cancelled),
                Ok("never".to_string()),
            ])))
            .await;

        assert!(matches!(result, Err(TurnError::Cancelled)));
        let deliveries = out.deliveries().await;
        assert_eq!(
            deliveries,
            vec![Delivery::Stream {
                fragments: vec!["partial ".into()],
                error: Some("Turn cancelled".into()),
            }]
        );
    }
}
