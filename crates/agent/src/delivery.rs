//! Turn events and how they reach an output channel.
//!
//! A running turn produces reply fragments and tool progress notes on one
//! ordered stream. [`deliver_turn`] replays that stream into an
//! [`OutputChannel`]: each run of fragments becomes one streamed message and
//! each note its own message, in the order the turn produced them.

use std::pin::Pin;

use cellpilot_core::error::TurnError;
use cellpilot_core::output::{OutputChannel, single_fragment};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Fragments buffered between the turn stream and the channel.
const SEGMENT_BUFFER: usize = 16;

/// One item produced by a running turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// Model reply text.
    Fragment(String),
    /// A tool progress note.
    Notice(String),
}

/// The ordered output of one turn. An error is always the last item.
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent, TurnError>> + Send>>;

/// Replay `events` into `output`.
///
/// An error ends the reply message that is open (or a new, empty one) and
/// is returned once the channel has consumed it.
pub async fn deliver_turn(output: &dyn OutputChannel, events: TurnStream) -> Result<(), TurnError> {
    let mut events = events.peekable();
    loop {
        let opens_reply = match Pin::new(&mut events).peek().await {
            None => return Ok(()),
            Some(Ok(TurnEvent::Notice(_))) => false,
            Some(_) => true,
        };

        if !opens_reply {
            if let Some(Ok(TurnEvent::Notice(text))) = events.next().await {
                output.stream(single_fragment(text)).await?;
            }
            continue;
        }

        let (tx, rx) = mpsc::channel(SEGMENT_BUFFER);
        let pump = async {
            while matches!(
                Pin::new(&mut events).peek().await,
                Some(Ok(TurnEvent::Fragment(_)) | Err(_))
            ) {
                let item = match events.next().await {
                    Some(Ok(TurnEvent::Fragment(text))) => Ok(text),
                    Some(Err(e)) => Err(e),
                    _ => break,
                };
                let last = item.is_err();
                if tx.send(item).await.is_err() || last {
                    break;
                }
            }
            drop(tx);
        };
        let (delivered, ()) = tokio::join!(output.stream(Box::pin(ReceiverStream::new(rx))), pump);
        delivered?;
    }
}
