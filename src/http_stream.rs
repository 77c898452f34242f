//! HTTP-stream bridge: splices a receiver's HTTP response into a sender's
//! WebSocket binary frames.

use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

const BRIDGE_CHANNEL_CAPACITY: usize = 64;

/// One end is handed to the session as `ActiveSession::http_sink`; the other
/// becomes the Axum response body. Each `send` corresponds to one flushed
/// write, matching the teacher's per-frame flush discipline for live
/// streaming responses.
pub fn new_bridge() -> (mpsc::Sender<Bytes>, Body) {
    let (tx, rx) = mpsc::channel(BRIDGE_CHANNEL_CAPACITY);
    let stream = ReceiverStream::new(rx).map(Ok::<_, std::io::Error>);
    (tx, Body::from_stream(stream))
}
