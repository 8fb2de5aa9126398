//! Stream wrappers used by stages that act per streamed message or at
//! end of stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use janus_core::{BoxMessage, BoxMessageStream, Status};
use tracing::Span;

/// How an observed stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEnd {
    /// The stream ran to completion.
    Completed,
    /// The stream yielded an error; nothing follows it.
    Failed(Status),
    /// The stream was dropped before it ended (caller went away).
    Dropped,
}

type ItemHook = Box<dyn FnMut(&BoxMessage) -> Result<(), Status> + Send>;
type EndHook = Box<dyn FnOnce(StreamEnd, u64) + Send>;

/// Wraps a message stream with per-item and end-of-stream hooks.
///
/// The item hook may reject a message, which ends the stream with that
/// status. The end hook fires exactly once, including when the stream is
/// dropped unfinished.
pub struct ObservedStream {
    inner: BoxMessageStream,
    on_item: Option<ItemHook>,
    on_end: Option<EndHook>,
    span: Option<Span>,
    items: u64,
    done: bool,
}

impl ObservedStream {
    /// Wraps `inner` with no hooks.
    pub fn new(inner: BoxMessageStream) -> Self {
        Self {
            inner,
            on_item: None,
            on_end: None,
            span: None,
            items: 0,
            done: false,
        }
    }

    /// Called for every message before it is yielded.
    pub fn on_item<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&BoxMessage) -> Result<(), Status> + Send + 'static,
    {
        self.on_item = Some(Box::new(hook));
        self
    }

    /// Called once with the outcome and the number of messages yielded.
    pub fn on_end<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(StreamEnd, u64) + Send + 'static,
    {
        self.on_end = Some(Box::new(hook));
        self
    }

    /// Enters `span` while the stream is polled and while hooks run.
    pub fn in_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Boxes the wrapper back into a message stream.
    pub fn boxed(self) -> BoxMessageStream {
        Box::pin(self)
    }

    fn finish(&mut self, end: StreamEnd) {
        self.done = true;
        if let Some(hook) = self.on_end.take() {
            let _entered = self.span.as_ref().map(Span::enter);
            hook(end, self.items);
        }
    }
}

impl Stream for ObservedStream {
    type Item = Result<BoxMessage, Status>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }
        let polled = {
            let _entered = this.span.as_ref().map(Span::enter);
            this.inner.as_mut().poll_next(cx)
        };
        match polled {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                this.finish(StreamEnd::Completed);
                Poll::Ready(None)
            }
            Poll::Ready(Some(Err(status))) => {
                this.finish(StreamEnd::Failed(status.clone()));
                Poll::Ready(Some(Err(status)))
            }
            Poll::Ready(Some(Ok(message))) => {
                if let Some(hook) = this.on_item.as_mut() {
                    if let Err(status) = hook(&message) {
                        this.finish(StreamEnd::Failed(status.clone()));
                        return Poll::Ready(Some(Err(status)));
                    }
                }
                this.items += 1;
                Poll::Ready(Some(Ok(message)))
            }
        }
    }
}

impl Drop for ObservedStream {
    fn drop(&mut self) {
        if !self.done {
            self.finish(StreamEnd::Dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Tick {
        #[prost(int64, tag = "1")]
        #[serde(default)]
        n: i64,
    }

    impl janus_core::Message for Tick {}

    fn ticks(n: i64) -> BoxMessageStream {
        Box::pin(futures_util::stream::iter(
            (0..n).map(|n| Ok::<BoxMessage, Status>(Box::new(Tick { n }))),
        ))
    }

    #[tokio::test]
    async fn test_end_hook_sees_count() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let stream = ObservedStream::new(ticks(3))
            .on_end(move |end, count| *sink.lock() = Some((end, count)))
            .boxed();

        assert_eq!(stream.count().await, 3);
        assert_eq!(*seen.lock(), Some((StreamEnd::Completed, 3)));
    }

    #[tokio::test]
    async fn test_item_hook_rejects() {
        let stream = ObservedStream::new(ticks(5))
            .on_item(|message| {
                let tick = janus_core::downcast_ref::<Tick>(message.as_ref()).unwrap();
                if tick.n == 2 {
                    return Err(Status::invalid_argument("two is not allowed"));
                }
                Ok(())
            })
            .boxed();

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_drop_reports_dropped() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let mut stream = ObservedStream::new(ticks(10))
            .on_end(move |end, count| *sink.lock() = Some((end, count)))
            .boxed();

        let _ = stream.next().await;
        drop(stream);
        assert_eq!(*seen.lock(), Some((StreamEnd::Dropped, 1)));
    }
}
