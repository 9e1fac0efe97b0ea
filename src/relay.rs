use crate::upstream::UpstreamError;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io;
use tokio::sync::mpsc;

/// Write side of a streamed response body.
///
/// Every item sent is one chunk of the client-visible body; dropping the
/// sender ends the body cleanly, sending an `Err` aborts it.
pub type BodySender = mpsc::Sender<Result<Bytes, io::Error>>;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("upstream stream failed: {0}")]
    UpstreamFailed(#[source] UpstreamError),

    #[error("client disconnected")]
    ClientDisconnected,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub fragments: usize,
    pub bytes: usize,
}

/// Forward completion fragments to `sink` one by one, in arrival order.
///
/// The sink is expected to have capacity 1 so at most one fragment is ever in
/// flight. If the receiving side goes away while an upstream pull is pending,
/// the pull is abandoned immediately and the fragment stream is dropped,
/// which closes the upstream connection.
pub async fn relay<S>(fragments: S, sink: BodySender) -> Result<RelayStats, RelayError>
where
    S: Stream<Item = Result<String, UpstreamError>> + Send,
{
    let mut fragments = std::pin::pin!(fragments);
    let mut stats = RelayStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.closed() => return Err(RelayError::ClientDisconnected),
            next = fragments.next() => next,
        };

        let fragment = match next {
            None => break,
            Some(Ok(fragment)) => fragment,
            Some(Err(e)) => {
                // Abort the body so the client sees a broken response rather
                // than a truncated one that looks complete.
                let _ = sink
                    .send(Err(io::Error::other("upstream stream failed")))
                    .await;
                return Err(RelayError::UpstreamFailed(e));
            }
        };

        stats.fragments += 1;
        if fragment.is_empty() {
            continue;
        }
        stats.bytes += fragment.len();
        sink.send(Ok(Bytes::from(fragment)))
            .await
            .map_err(|_| RelayError::ClientDisconnected)?;
    }

    Ok(stats)
}
