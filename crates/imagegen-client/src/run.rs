//! The streaming decode task, its cancellation handle, and the channel-backed
//! subscription built on top of it.
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::errors::StreamError;
use crate::sse::{FrameError, SseDecoder, decode_frame};
use crate::stream::StreamEvent;
use crate::transport::{StreamRequest, StreamTransport};

/// Handle used to cancel an in-flight stream.
///
/// Cancellation is silent: the stream stops delivering events and no
/// `StreamEvent::Error` is emitted for it. Aborting more than once, or after
/// the stream has finished, does nothing. Dropping the handle does not
/// cancel the stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    fn new(tx: watch::Sender<bool>) -> Self {
        Self { tx: Arc::new(tx) }
    }

    /// A handle attached to no stream.
    pub(crate) fn detached() -> Self {
        let (tx, _) = watch::channel(false);
        Self::new(tx)
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        let first = self.tx.send_if_modified(|aborted| !std::mem::replace(aborted, true));
        if first {
            debug!(event = "stream.abort_requested", domain = "stream");
        }
    }

    /// Whether `abort` has been called.
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Delivers decoded events to the caller's callback unless the stream was
/// aborted.
struct EventSink<F> {
    stream_id: uuid::Uuid,
    abort_rx: watch::Receiver<bool>,
    on_event: F,
    delivered: u64,
    dropped: u64,
}

impl<F: FnMut(StreamEvent)> EventSink<F> {
    fn emit(&mut self, event: StreamEvent) -> bool {
        if *self.abort_rx.borrow() {
            return false;
        }
        trace!(
            event = "stream.event_delivered",
            domain = "stream",
            stream_id = %self.stream_id,
            kind = event.kind()
        );
        (self.on_event)(event);
        self.delivered += 1;
        true
    }

    fn fail(&mut self, err: StreamError) {
        warn!(
            event = "stream.failed",
            domain = "stream",
            stream_id = %self.stream_id,
            error = %err
        );
        self.emit(StreamEvent::error(err.to_string()));
    }
}

/// Starts the decode task for `request` and returns immediately.
///
/// Without a tokio runtime the failure is reported synchronously through
/// `on_event` and the returned handle is inert.
pub(crate) fn spawn_stream<F>(
    transport: Arc<dyn StreamTransport>,
    request: StreamRequest,
    on_event: F,
) -> AbortHandle
where
    F: FnMut(StreamEvent) + Send + 'static,
{
    let stream_id = uuid::Uuid::new_v4();
    let (abort_tx, abort_rx) = watch::channel(false);
    let handle = AbortHandle::new(abort_tx);
    let mut sink = EventSink {
        stream_id,
        abort_rx: abort_rx.clone(),
        on_event,
        delivered: 0,
        dropped: 0,
    };

    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            debug!(
                event = "stream.started",
                domain = "stream",
                %stream_id,
                path = %request.path
            );
            runtime.spawn(stream_task(transport, request, sink, abort_rx));
            handle
        }
        Err(err) => {
            sink.fail(StreamError::Setup(format!("no async runtime available: {err}")));
            AbortHandle::detached()
        }
    }
}

async fn stream_task<F>(
    transport: Arc<dyn StreamTransport>,
    request: StreamRequest,
    mut sink: EventSink<F>,
    abort_rx: watch::Receiver<bool>,
) where
    F: FnMut(StreamEvent) + Send + 'static,
{
    let stream_id = sink.stream_id;
    let path = request.path.clone();
    tokio::select! {
        biased;
        () = wait_for_abort(abort_rx) => {
            debug!(event = "stream.cancelled", domain = "stream", %stream_id, %path);
        }
        () = pump(transport.as_ref(), request, &mut sink) => {}
    }
    debug!(
        event = "stream.finished",
        domain = "stream",
        %stream_id,
        %path,
        delivered = sink.delivered,
        dropped = sink.dropped
    );
}

/// Resolves once abort is requested. Never resolves if every handle is
/// dropped without aborting.
async fn wait_for_abort(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

async fn pump<F: FnMut(StreamEvent)>(
    transport: &dyn StreamTransport,
    request: StreamRequest,
    sink: &mut EventSink<F>,
) {
    let response = match transport.open(request).await {
        Ok(response) => response,
        Err(err) => return sink.fail(err.into()),
    };
    if !response.is_success() {
        return sink.fail(StreamError::Http {
            status: response.status,
        });
    }
    let Some(mut body) = response.body else {
        return sink.fail(StreamError::NoBody);
    };

    let mut decoder = SseDecoder::default();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => return sink.fail(err.into()),
        };
        for frame in decoder.push_chunk(&chunk) {
            match decode_frame(&frame) {
                Ok(Some(event)) => {
                    if !sink.emit(event) {
                        return;
                    }
                }
                Ok(None) => {}
                Err(FrameError::UnknownType(kind)) => {
                    sink.dropped += 1;
                    debug!(
                        event = "stream.frame_skipped",
                        domain = "stream",
                        stream_id = %sink.stream_id,
                        kind = %kind
                    );
                }
                Err(err) => {
                    sink.dropped += 1;
                    warn!(
                        event = "stream.frame_dropped",
                        domain = "stream",
                        stream_id = %sink.stream_id,
                        error = %err,
                        frame_len = frame.data.as_ref().map_or(0, String::len) as u64
                    );
                }
            }
        }
    }
    if decoder.has_pending() {
        debug!(
            event = "stream.trailing_frame_discarded",
            domain = "stream",
            stream_id = %sink.stream_id
        );
    }
}

/// Pull-style view of a stream: events are queued by the decode task and
/// read with [`next_event`](Self::next_event).
///
/// Dropping the subscription aborts the stream, including through any
/// handle obtained from [`abort_handle`](Self::abort_handle).
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    abort: AbortHandle,
}

impl EventSubscription {
    pub(crate) fn start(
        transport: Arc<dyn StreamTransport>,
        request: StreamRequest,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let abort = spawn_stream(transport, request, move |event| {
            let _ = tx.send(event);
        });
        Self { rx, abort }
    }

    /// Next event in stream order; `None` once the stream task has ended.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Returns a handle that can cancel the stream.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Cancels the stream.
    pub fn abort(&self) {
        self.abort.abort();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::errors::TransportError;
    use crate::transport::RequestBody;
    use crate::transport::fake::{FakeTransport, Script};

    fn request() -> StreamRequest {
        StreamRequest {
            path: "/api/generate/stream".into(),
            body: RequestBody::Json(json!({"prompt": "p", "size": "1024x1024", "quality": "auto"})),
        }
    }

    async fn collect(transport: Arc<FakeTransport>) -> Vec<StreamEvent> {
        let mut sub = EventSubscription::start(transport, request());
        let mut events = Vec::new();
        while let Some(event) =
            tokio::time::timeout(Duration::from_secs(5), sub.next_event())
                .await
                .expect("stream should end")
        {
            events.push(event);
        }
        events
    }

    fn frames() -> (String, Vec<StreamEvent>) {
        let body = concat!(
            "data: {\"type\": \"progress\", \"data\": \"Starting ✨\"}\n\n",
            "data: {\"type\": \"partial_image\", \"data\": \"iVBORw0K\"}\n\n",
            ": keep-alive\n\n",
            "data: {\"type\": \"image\", \"data\": \"iVBORw0KGgo=\"}\n\n",
            "data: {\"type\": \"complete\", \"metadata\": {\"id\":\"1\"}, \"image_data\":\"abc\"}\n\n",
            "data: [DONE]\n\n",
        );
        let expected = vec![
            StreamEvent::progress("Starting ✨"),
            StreamEvent::partial_image("iVBORw0K"),
            StreamEvent::image("iVBORw0KGgo="),
            StreamEvent::complete(Some(json!({"id": "1"})), Some("abc".into())),
        ];
        (body.to_string(), expected)
    }

    #[tokio::test]
    async fn delivers_example_events_in_order() {
        let transport = FakeTransport::ok([
            "data: {\"type\": \"progress\", \"data\": \"Starting\"}\n\n",
            "data: {\"type\": \"complete\", \"metadata\": {\"id\":\"1\"}, \"image_data\":\"abc\"}\n\n",
        ]);
        let events = collect(transport).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::progress("Starting"),
                StreamEvent::complete(Some(json!({"id": "1"})), Some("abc".into())),
            ]
        );
    }

    #[tokio::test]
    async fn any_chunking_yields_same_events() {
        let (body, expected) = frames();
        let bytes = body.as_bytes();
        for size in 1..=11 {
            let transport = FakeTransport::ok(bytes.chunks(size));
            assert_eq!(collect(transport).await, expected, "chunk size {size}");
        }
        for split in 0..=bytes.len() {
            let transport = FakeTransport::ok([&bytes[..split], &bytes[split..]]);
            assert_eq!(collect(transport).await, expected, "split at {split}");
        }
    }

    #[tokio::test]
    async fn callback_receives_events_synchronously_in_order() {
        let (body, expected) = frames();
        let transport = FakeTransport::ok([body]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let sink = seen.clone();
        let guard = DropSignal(Some(done_tx));
        spawn_stream(transport, request(), move |event| {
            let _keep = &guard;
            sink.lock().expect("lock").push(event);
        });
        tokio::time::timeout(Duration::from_secs(5), done_rx)
            .await
            .expect("task should finish")
            .ok();
        assert_eq!(*seen.lock().expect("lock"), expected);
    }

    struct DropSignal(Option<tokio::sync::oneshot::Sender<()>>);

    impl Drop for DropSignal {
        fn drop(&mut self) {
            if let Some(tx) = self.0.take() {
                let _ = tx.send(());
            }
        }
    }

    #[tokio::test]
    async fn http_failure_is_one_error_and_no_reads() {
        let transport = FakeTransport::new(Script::Respond {
            status: 500,
            chunks: Some(vec![Ok(Bytes::from_static(b"data: {\"type\":\"image\",\"data\":\"x\"}\n\n"))]),
            hang_after: false,
        });
        let events = collect(transport.clone()).await;
        assert_eq!(events, vec![StreamEvent::error("HTTP error! status: 500")]);
        assert_eq!(transport.read_count(), 0);
    }

    #[tokio::test]
    async fn missing_body_is_one_error() {
        let transport = FakeTransport::new(Script::Respond {
            status: 200,
            chunks: None,
            hang_after: false,
        });
        assert_eq!(
            collect(transport).await,
            vec![StreamEvent::error("No response body")]
        );
    }

    #[tokio::test]
    async fn network_rejection_is_one_error() {
        let transport = FakeTransport::new(Script::Fail(TransportError::connect("Network error")));
        assert_eq!(
            collect(transport).await,
            vec![StreamEvent::error("Error: Network error")]
        );
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_and_stream_continues() {
        let transport = FakeTransport::ok([
            "data: {\"type\": \"progress\", \"data\": 1}\n\ndata: {oops}\n\n",
            "data: {\"type\": \"mystery\"}\n\ndata: {\"type\": \"image\", \"data\": \"QQ==\"}\n\n",
        ]);
        assert_eq!(
            collect(transport).await,
            vec![StreamEvent::progress(1), StreamEvent::image("QQ==")]
        );
    }

    #[tokio::test]
    async fn read_failure_ends_stream_with_one_error() {
        let transport = FakeTransport::new(Script::Respond {
            status: 200,
            chunks: Some(vec![
                Ok(Bytes::from_static(b"data: {\"type\":\"progress\",\"data\":\"a\"}\n\n")),
                Err(TransportError::read("connection reset")),
                Ok(Bytes::from_static(b"data: {\"type\":\"progress\",\"data\":\"b\"}\n\n")),
            ]),
            hang_after: false,
        });
        assert_eq!(
            collect(transport).await,
            vec![
                StreamEvent::progress("a"),
                StreamEvent::error("Error: connection reset"),
            ]
        );
    }

    #[tokio::test]
    async fn trailing_unterminated_frame_is_not_delivered() {
        let transport = FakeTransport::ok([
            "data: {\"type\":\"progress\",\"data\":\"a\"}\n\ndata: {\"type\":\"image\",\"data\":\"x\"}",
        ]);
        assert_eq!(collect(transport).await, vec![StreamEvent::progress("a")]);
    }

    #[tokio::test]
    async fn abort_mid_stream_stops_delivery_without_error() {
        let transport = FakeTransport::new(Script::Respond {
            status: 200,
            chunks: Some(vec![Ok(Bytes::from_static(
                b"data: {\"type\":\"progress\",\"data\":\"a\"}\n\n",
            ))]),
            hang_after: true,
        });
        let mut sub = EventSubscription::start(transport, request());
        let first = sub.next_event().await.expect("first event");
        assert_eq!(first, StreamEvent::progress("a"));

        let handle = sub.abort_handle();
        handle.abort();
        handle.abort();
        assert!(handle.is_aborted());

        let next = tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("stream should end after abort");
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn abort_before_response_is_silent() {
        let transport = FakeTransport::new(Script::Hang);
        let mut sub = EventSubscription::start(transport.clone(), request());
        sub.abort();
        let next = tokio::time::timeout(Duration::from_secs(5), sub.next_event())
            .await
            .expect("stream should end after abort");
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn abort_after_completion_is_a_noop() {
        let transport = FakeTransport::ok(["data: {\"type\":\"image\",\"data\":\"x\"}\n\n"]);
        let mut sub = EventSubscription::start(transport, request());
        assert_eq!(sub.next_event().await, Some(StreamEvent::image("x")));
        assert_eq!(sub.next_event().await, None);
        sub.abort();
        sub.abort();
    }

    #[tokio::test]
    async fn dropping_a_subscription_ends_its_stream() {
        let transport = FakeTransport::new(Script::Respond {
            status: 200,
            chunks: Some(
                (0..50)
                    .map(|i| Ok(Bytes::from(format!("data: {{\"type\":\"progress\",\"data\":{i}}}\n\n"))))
                    .collect(),
            ),
            hang_after: true,
        });
        let mut sub = EventSubscription::start(transport.clone(), request());
        assert_eq!(sub.next_event().await, Some(StreamEvent::progress(0)));
        drop(sub);

        // the task holds the only other reference to the transport
        tokio::time::timeout(Duration::from_secs(5), async {
            while Arc::strong_count(&transport) > 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stream task should end once the subscription is dropped");
        let reads = transport.read_count();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.read_count(), reads);
    }

    #[tokio::test]
    async fn concurrent_streams_cancel_independently() {
        let slow = FakeTransport::new(Script::Respond {
            status: 200,
            chunks: Some(vec![Ok(Bytes::from_static(
                b"data: {\"type\":\"progress\",\"data\":\"slow\"}\n\ndata: {\"type\":",
            ))]),
            hang_after: true,
        });
        let (body, expected) = frames();
        let bytes = body.into_bytes();
        let fast = FakeTransport::ok(bytes.chunks(5));

        let mut first = EventSubscription::start(slow, request());
        assert_eq!(first.next_event().await, Some(StreamEvent::progress("slow")));
        let mut second = EventSubscription::start(fast, request());
        first.abort();

        let mut events = Vec::new();
        while let Some(event) = tokio::time::timeout(Duration::from_secs(5), second.next_event())
            .await
            .expect("second stream should finish")
        {
            events.push(event);
        }
        assert_eq!(events, expected);
        assert!(!second.abort_handle().is_aborted());
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(5), first.next_event())
                .await
                .expect("aborted stream should end"),
            None
        );
    }

    #[tokio::test]
    async fn unknown_event_types_are_skipped() {
        let transport = FakeTransport::ok([
            "data: {\"type\": \"partial\"}\n\ndata: {\"type\": \"image\", \"data\": \"QQ==\"}\n\n",
        ]);
        assert_eq!(collect(transport).await, vec![StreamEvent::image("QQ==")]);
    }

    #[tokio::test]
    async fn dropping_the_handle_does_not_cancel() {
        let transport = FakeTransport::ok(["data: {\"type\":\"image\",\"data\":\"x\"}\n\n"]);
        let (tx, mut rx) = mpsc::unbounded_channel();
        drop(spawn_stream(transport, request(), move |event| {
            let _ = tx.send(event);
        }));
        assert_eq!(rx.recv().await, Some(StreamEvent::image("x")));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn without_runtime_error_is_reported_synchronously() {
        let transport = FakeTransport::ok(["data: {\"type\":\"image\",\"data\":\"x\"}\n\n"]);
        let mut seen = Vec::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let handle = spawn_stream(transport.clone(), request(), move |event| {
            let _ = tx.send(event);
        });
        seen.extend(rx.try_iter());
        assert_eq!(seen.len(), 1);
        assert!(
            matches!(&seen[0], StreamEvent::Error { error, .. } if error.starts_with("Error: no async runtime"))
        );
        assert!(transport.recorded().is_empty());
        handle.abort();
    }
}
