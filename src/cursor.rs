// src/cursor.rs
// Capped cursor consumption shared by the find and aggregate tools

use futures::StreamExt;
use mongodb::bson::Document;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::output::doc_byte_size;
use crate::provider::DocStream;

/// Why collection stopped before the cursor was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapReason {
    /// The cursor ran dry.
    Exhausted,
    /// The per-call document cap was hit.
    DocumentLimit,
    /// The server-side byte cap was hit.
    ServerBytesLimit,
    /// The caller's `responseBytesLimit` was hit.
    CallerBytesLimit,
}

/// Result of a capped collection pass.
#[derive(Debug)]
pub struct CappedDocuments {
    pub documents: Vec<Document>,
    pub reason: CapReason,
    pub bytes: usize,
}

/// Caps applied while draining a cursor. A zero cap disables that dimension.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub max_documents: i64,
    pub server_max_bytes: u64,
    pub caller_max_bytes: Option<u64>,
}

/// Drain `stream` until exhaustion or a cap is reached. The cancellation
/// signal is checked between documents; on cancel the stream is dropped
/// (closing the server-side cursor) and the call fails with `Cancelled`.
pub async fn collect_capped(
    mut stream: DocStream,
    caps: Caps,
    cancellation: &CancellationToken,
) -> Result<CappedDocuments> {
    let mut documents = Vec::new();
    let mut bytes = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                drop(stream);
                return Err(crate::error::ServerError::Cancelled);
            }
            next = stream.next() => next,
        };

        let Some(item) = next else {
            return Ok(CappedDocuments {
                documents,
                reason: CapReason::Exhausted,
                bytes,
            });
        };
        let doc = item?;

        let size = doc_byte_size(&doc);
        if caps.server_max_bytes > 0 && (bytes + size) as u64 > caps.server_max_bytes {
            return Ok(CappedDocuments {
                documents,
                reason: CapReason::ServerBytesLimit,
                bytes,
            });
        }
        if let Some(caller_max) = caps.caller_max_bytes
            && caller_max > 0
            && (bytes + size) as u64 > caller_max
        {
            return Ok(CappedDocuments {
                documents,
                reason: CapReason::CallerBytesLimit,
                bytes,
            });
        }

        bytes += size;
        documents.push(doc);

        if caps.max_documents > 0 && documents.len() as i64 >= caps.max_documents {
            return Ok(CappedDocuments {
                documents,
                reason: CapReason::DocumentLimit,
                bytes,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use mongodb::bson::doc;

    fn docs_stream(count: usize) -> DocStream {
        let docs: Vec<crate::error::Result<Document>> = (0..count)
            .map(|i| Ok(doc! { "i": i as i64, "pad": "x".repeat(64) }))
            .collect();
        stream::iter(docs).boxed()
    }

    fn uncapped() -> Caps {
        Caps {
            max_documents: 0,
            server_max_bytes: 0,
            caller_max_bytes: None,
        }
    }

    #[tokio::test]
    async fn collects_until_exhausted() {
        let result = collect_capped(docs_stream(5), uncapped(), &CancellationToken::new())
            .await
            .expect("collects");
        assert_eq!(result.documents.len(), 5);
        assert_eq!(result.reason, CapReason::Exhausted);
        assert!(result.bytes > 0);
    }

    #[tokio::test]
    async fn document_cap_stops_collection() {
        let caps = Caps {
            max_documents: 3,
            ..uncapped()
        };
        let result = collect_capped(docs_stream(10), caps, &CancellationToken::new())
            .await
            .expect("collects");
        assert_eq!(result.documents.len(), 3);
        assert_eq!(result.reason, CapReason::DocumentLimit);
    }

    #[tokio::test]
    async fn server_byte_cap_stops_collection() {
        let caps = Caps {
            server_max_bytes: 150,
            ..uncapped()
        };
        let result = collect_capped(docs_stream(10), caps, &CancellationToken::new())
            .await
            .expect("collects");
        assert_eq!(result.reason, CapReason::ServerBytesLimit);
        assert!(result.documents.len() < 10);
    }

    #[tokio::test]
    async fn caller_byte_cap_stops_collection() {
        let caps = Caps {
            caller_max_bytes: Some(100),
            ..uncapped()
        };
        let result = collect_capped(docs_stream(10), caps, &CancellationToken::new())
            .await
            .expect("collects");
        assert_eq!(result.reason, CapReason::CallerBytesLimit);
    }

    #[tokio::test]
    async fn cancellation_aborts_collection() {
        let token = CancellationToken::new();
        token.cancel();
        let err = collect_capped(docs_stream(10), uncapped(), &token)
            .await
            .expect_err("cancelled");
        assert!(matches!(err, crate::error::ServerError::Cancelled));
    }
}
