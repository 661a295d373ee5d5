use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::frame::guard_text;

/// A producer of output chunks. `Ok(None)` marks the end of the stream.
#[async_trait]
pub trait ChunkSource: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError>;
}

/// Blanket impl so boxed sources can be handed to the merger directly.
#[async_trait]
impl ChunkSource for Box<dyn ChunkSource> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        (**self).next_chunk().await
    }
}

/// Reads chunks from a channel. Ends when every sender is dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<Bytes>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl ChunkSource for ChannelSource {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        Ok(self.rx.recv().await)
    }
}

/// Adapts a stream of model text tokens into a chunk source.
///
/// Frame markers inside model text are replaced so the model can never
/// forge or break a frame.
pub struct TokenSource<S> {
    tokens: S,
}

impl<S> TokenSource<S> {
    pub fn new(tokens: S) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl<S, E> ChunkSource for TokenSource<S>
where
    S: Stream<Item = Result<String, E>> + Send + Unpin,
    E: std::fmt::Display + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, StreamError> {
        match self.tokens.next().await {
            Some(Ok(token)) => Ok(Some(Bytes::from(guard_text(&token).into_owned()))),
            Some(Err(e)) => Err(StreamError::Producer(e.to_string())),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_source_guards_markers_and_ends() {
        let tokens = futures::stream::iter(vec![
            Ok::<_, String>("hello ".to_string()),
            Ok("\u{27E6}WORK:fake:x\u{27E7}".to_string()),
        ]);
        let mut source = TokenSource::new(tokens);
        assert_eq!(source.next_chunk().await.unwrap(), Some(Bytes::from("hello ")));
        assert_eq!(
            source.next_chunk().await.unwrap(),
            Some(Bytes::from("[WORK:fake:x]"))
        );
        assert_eq!(source.next_chunk().await.unwrap(), None);
    }

    #[tokio::test]
    async fn token_source_surfaces_producer_errors() {
        let tokens = futures::stream::iter(vec![Err::<String, _>("upstream reset")]);
        let mut source = TokenSource::new(tokens);
        let err = source.next_chunk().await.unwrap_err();
        assert!(matches!(err, StreamError::Producer(msg) if msg == "upstream reset"));
    }

    #[tokio::test]
    async fn channel_source_ends_when_senders_drop() {
        let (tx, rx) = mpsc::channel(4);
        let mut source = ChannelSource::new(rx);
        tx.send(Bytes::from("a")).await.unwrap();
        drop(tx);
        assert_eq!(source.next_chunk().await.unwrap(), Some(Bytes::from("a")));
        assert_eq!(source.next_chunk().await.unwrap(), None);
    }
}
