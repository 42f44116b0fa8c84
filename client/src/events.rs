//! Event notifications posted to the UI layer.
//!
//! The core never blocks waiting for the UI to act: events flow one way
//! through a bounded channel, and the UI side consumes them as a stream.

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use oft_protocol::{Uin, UserStatus};
use crate::session::ConnectionState;

#[derive(Debug, Clone)]
pub enum ClientEvent {
  /// The control connection moved to a new state.
  ConnectionState(ConnectionState),
  /// An instant message arrived.
  Message { sender: Uin, text: String },
  /// A contact changed presence.
  StatusChange { who: Uin, status: UserStatus },
  /// A peer proposed a file transfer; accept or decline by cookie.
  FileOffer { cookie: [u8; 8], from: Uin, file_name: String, size: u32 },
  /// Data-phase progress for an active transfer.
  TransferProgress { cookie: [u8; 8], bytes_done: u64, bytes_total: u64 },
  TransferComplete { cookie: [u8; 8] },
  TransferFailed { cookie: [u8; 8], reason: String },
}

pub type EventStream = ReceiverStream<ClientEvent>;

#[derive(Debug, Clone)]
pub struct EventSink {
  tx: mpsc::Sender<ClientEvent>,
}

impl EventSink {
  pub fn channel(capacity: usize) -> (Self, EventStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (Self { tx }, ReceiverStream::new(rx))
  }

  /// Post an event. A dropped receiver is logged and otherwise ignored;
  /// the protocol core keeps running without a UI.
  pub async fn post(&self, event: ClientEvent) {
    if self.tx.send(event).await.is_err() {
      tracing::warn!("event receiver dropped, discarding event");
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  #[tokio::test]
  async fn events_arrive_in_post_order() {
    let (sink, mut stream) = EventSink::channel(8);
    sink.post(ClientEvent::Message { sender: 1, text: "a".into() }).await;
    sink.post(ClientEvent::Message { sender: 2, text: "b".into() }).await;

    match stream.next().await {
      Some(ClientEvent::Message { sender: 1, .. }) => {}
      other => panic!("unexpected event: {other:?}"),
    }
    match stream.next().await {
      Some(ClientEvent::Message { sender: 2, .. }) => {}
      other => panic!("unexpected event: {other:?}"),
    }
  }

  #[tokio::test]
  async fn posting_without_receiver_does_not_panic() {
    let (sink, stream) = EventSink::channel(1);
    drop(stream);
    sink.post(ClientEvent::TransferComplete { cookie: [0; 8] }).await;
  }
}
