//! Receive loop and record-separator framing.

use std::sync::{Arc, Weak};

use tokio::sync::oneshot;
use tracing::debug;

use super::inner::ConnectionCore;
use crate::error::SignalrResult;
use crate::transport::Transport;

/// Frames on the transport are delimited by the ASCII record separator.
pub(crate) const RECORD_SEPARATOR: char = '\u{1e}';

pub(crate) struct Frame<'a> {
    pub(crate) payload: &'a str,
    /// Whether the frame carried its trailing record separator.
    pub(crate) terminated: bool,
}

/// Split a received buffer into frames, in order.
///
/// Complete frames lose their separator. A buffer with no separator at all,
/// or a trailing fragment after the last separator, is surfaced as a single
/// unterminated frame: the transport is message-framed, so a missing
/// separator means the peer chose to send an unframed message.
pub(crate) fn frames(chunk: &str) -> Vec<Frame<'_>> {
    let mut frames = Vec::new();
    let mut rest = chunk;
    while let Some(index) = rest.find(RECORD_SEPARATOR) {
        let (payload, tail) = rest.split_at(index);
        if !payload.is_empty() {
            frames.push(Frame {
                payload,
                terminated: true,
            });
        }
        rest = &tail[RECORD_SEPARATOR.len_utf8()..];
    }
    if !rest.is_empty() {
        frames.push(Frame {
            payload: rest,
            terminated: false,
        });
    }
    frames
}

/// A frame acknowledges the handshake when it is `{}` up to whitespace.
pub(crate) fn is_handshake(payload: &str) -> bool {
    let mut significant = payload.chars().filter(|c| !c.is_ascii_whitespace());
    significant.next() == Some('{') && significant.next() == Some('}') && significant.next().is_none()
}

/// Whether any frame in the buffer acknowledges the handshake.
fn completes_handshake(chunk: &str) -> bool {
    frames(chunk)
        .iter()
        .any(|frame| frame.terminated && is_handshake(frame.payload))
}

/// The receive loop: one logical task per connection instance.
///
/// Holds only a weak reference to the connection so that dropping the last
/// owner tears the loop down instead of keeping the connection alive. A
/// terminal receive failure before the handshake is reported through
/// `handshake_tx`; afterwards it drives the disconnect path.
///
/// The buffer that acknowledges the handshake is not surfaced to the user
/// callback until the start flow has confirmed the connected transition over
/// `ready_rx`, so no message can reach the callback before the start
/// completion is observable. A dropped `ready_rx` sender means the start
/// failed after all and nothing is delivered.
pub(crate) async fn run(
    core: Weak<ConnectionCore>,
    transport: Arc<dyn Transport>,
    handshake_tx: oneshot::Sender<SignalrResult<()>>,
    ready_rx: oneshot::Receiver<()>,
) {
    let mut handshake_tx = Some(handshake_tx);
    let mut ready_rx = Some(ready_rx);
    loop {
        match transport.receive().await {
            Ok(chunk) => {
                {
                    let Some(core) = core.upgrade() else { return };
                    core.note_chunk(&chunk);
                }
                if handshake_tx.is_some() && completes_handshake(&chunk) {
                    if let Some(tx) = handshake_tx.take() {
                        let _ = tx.send(Ok(()));
                    }
                    if let Some(ready) = ready_rx.take() {
                        if ready.await.is_err() {
                            return;
                        }
                        // let the task awaiting the start resume first
                        tokio::task::yield_now().await;
                    }
                }
                let Some(core) = core.upgrade() else { return };
                core.deliver_frames(&chunk);
            }
            Err(error) => {
                debug!(%error, "receive loop terminating");
                if let Some(tx) = handshake_tx.take() {
                    let _ = tx.send(Err(error));
                    return;
                }
                if let Some(core) = core.upgrade() {
                    core.handle_transport_closed().await;
                }
                return;
            }
        }
    }
}
