//! Push channel over the broadcast service's SSE surface.
//!
//! The handshake posts the auth frame and receives a session id; the push
//! path is a long-lived `GET` consumed as an SSE byte stream; the write path
//! posts frames back to the same session. Bidirectional in effect, even
//! though each leg is plain HTTP.

use std::sync::Arc;

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt, future::BoxFuture, pin_mut};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{dto::wire::WireFrame, store::http::StoreConfig};

use super::{BroadcastLink, LinkError, LinkResult, LinkSession};

/// Capacity of the inbound frame channel per session.
const INBOUND_CAPACITY: usize = 64;

/// [`BroadcastLink`] over the store's SSE broadcast surface.
#[derive(Clone)]
pub struct SseLink {
    client: Client,
    base_url: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: String,
}

impl SseLink {
    /// Build the link from the same configuration as the REST store client.
    pub fn new(config: StoreConfig) -> LinkResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| LinkError::Connect { source })?;
        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }
}

impl BroadcastLink for SseLink {
    fn connect(&self, auth: WireFrame) -> BoxFuture<'static, LinkResult<LinkSession>> {
        let link = self.clone();
        Box::pin(async move {
            // Handshake: trade the auth frame for a session id.
            let handshake_url = format!("{}/session", link.base_url);
            let response = link
                .request(link.client.post(&handshake_url).json(&auth))
                .send()
                .await
                .map_err(|source| LinkError::Connect { source })?;
            if !response.status().is_success() {
                return Err(LinkError::Rejected {
                    status: response.status(),
                });
            }
            let session: SessionCreated = response
                .json()
                .await
                .map_err(|source| LinkError::Connect { source })?;

            // Push leg: long-lived SSE stream.
            let events_url = format!("{}/session/{}/events", link.base_url, session.session_id);
            let response = link
                .request(link.client.get(&events_url))
                .send()
                .await
                .map_err(|source| LinkError::Connect { source })?;
            if !response.status().is_success() {
                return Err(LinkError::Rejected {
                    status: response.status(),
                });
            }

            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
            let reader = tokio::spawn(async move {
                let frames = frame_stream(response.bytes_stream());
                pin_mut!(frames);
                while let Some(item) = frames.next().await {
                    match item {
                        Ok(frame) => {
                            if inbound_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "push stream error; ending session");
                            break;
                        }
                    }
                }
                // Dropping inbound_tx signals end-of-session to the supervisor.
            });

            // Write leg: dedicated task so callers never await HTTP latency.
            let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
            let writer_link = link.clone();
            let writer = tokio::spawn(async move {
                while let Some(frame) = outbound_rx.recv().await {
                    let send = writer_link
                        .request(writer_link.client.post(&events_url).json(&frame))
                        .send()
                        .await;
                    match send {
                        Ok(response) if response.status().is_success() => {}
                        Ok(response) => {
                            warn!(status = %response.status(), "broadcast write rejected");
                        }
                        Err(err) => {
                            // Non-fatal: the direct store write already carried
                            // the state; the reader leg will notice a dead server.
                            debug!(error = %err, "broadcast write failed");
                        }
                    }
                }
            });

            Ok(LinkSession::new(inbound_rx, outbound_tx, vec![reader, writer]))
        })
    }
}

/// Turn an SSE byte stream into a stream of decoded frames.
///
/// Frames are the `data:` payloads of each event block; event names and
/// comments are ignored since the JSON `type` tag carries the frame kind.
fn frame_stream(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send,
) -> impl Stream<Item = LinkResult<WireFrame>> + Send {
    try_stream! {
        let mut buffer = String::new();
        pin_mut!(bytes);
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|source| LinkError::Stream { source })?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(boundary) = buffer.find("\n\n") {
                let block: String = buffer.drain(..boundary + 2).collect();
                if let Some(frame) = parse_event_block(&block)? {
                    yield frame;
                }
            }
        }
    }
}

/// Extract and decode the `data:` payload of one SSE event block.
fn parse_event_block(block: &str) -> LinkResult<Option<WireFrame>> {
    let mut data = String::new();
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }

    if data.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&data)
        .map(Some)
        .map_err(|source| LinkError::Decode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::studio::{BuzzerDirection, StudioId};

    #[test]
    fn event_block_decodes_data_payload() {
        let frame = WireFrame::buzz(
            StudioId::from("studio-1"),
            BuzzerDirection::TalentToProducer,
            true,
        );
        let block = format!("event: buzz\ndata: {}\n", serde_json::to_string(&frame).unwrap());
        let parsed = parse_event_block(&block).unwrap().unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn comment_only_block_yields_nothing() {
        assert!(parse_event_block(": keep-alive\n").unwrap().is_none());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let block = "data: {\"type\":\"clearChat\",\ndata: \"studioId\":\"tech\"}\n";
        let parsed = parse_event_block(block).unwrap().unwrap();
        assert_eq!(
            parsed,
            WireFrame::ClearChat {
                studio_id: StudioId::from("tech")
            }
        );
    }

    #[tokio::test]
    async fn frame_stream_handles_chunks_split_mid_event() {
        let frame = WireFrame::ClearChat {
            studio_id: StudioId::from("remote"),
        };
        let payload = format!("data: {}\n\n", serde_json::to_string(&frame).unwrap());
        let (first, second) = payload.split_at(10);
        let chunks: Vec<reqwest::Result<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(first.as_bytes())),
            Ok(Bytes::copy_from_slice(second.as_bytes())),
        ];

        let stream = frame_stream(futures::stream::iter(chunks));
        pin_mut!(stream);
        let decoded = stream.next().await.unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(stream.next().await.is_none());
    }
}
