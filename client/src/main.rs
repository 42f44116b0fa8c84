mod banner;
mod core;
mod events;
mod rendezvous;
mod resolver;
mod session;

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use oft_protocol::UserStatus;
use crate::events::{ClientEvent, EventSink};
use crate::rendezvous::transfer::FileEntry;
use crate::session::{Session, SessionCommand};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  banner::print_banner();

  let subscriber = tracing_subscriber::FmtSubscriber::builder()
    .finish();
  tracing::subscriber::set_global_default(subscriber)?;
  let app_state = core::create_client_state()?;

  // Create a shutdown token for graceful shutdown coordination
  let shutdown = CancellationToken::new();

  let (events, mut event_stream) = EventSink::channel(256);
  let (commands, command_rx) = mpsc::channel(32);

  let session_shutdown = shutdown.clone();
  let session_app_state = app_state.clone();
  let mut session_task = tokio::spawn(async move {
    let mut session = Session::new(session_app_state, events, session_shutdown);
    let mut framed = session.connect().await?;
    session.authenticate(&mut framed).await?;
    session.run(framed, command_rx).await
  });

  let event_shutdown = shutdown.clone();
  let mut event_task = tokio::spawn(async move {
    loop {
      tokio::select! {
        _ = event_shutdown.cancelled() => break,
        event = event_stream.next() => match event {
          Some(event) => report_event(event),
          None => break,
        },
      }
    }
  });

  let input_shutdown = shutdown.clone();
  let input_task = tokio::spawn(async move {
    read_commands(commands, input_shutdown).await;
  });

  // Wait for shutdown signal or task failure
  tokio::select! {
    _ = signal::ctrl_c() => {
      tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
    result = &mut session_task => {
      tracing::error!("Session exited: {:?}", result);
    }
    _ = &mut event_task => {
      tracing::error!("Event loop exited unexpectedly");
    }
  }

  // Signal all tasks to shut down
  shutdown.cancel();
  tracing::info!("Shutdown complete");
  let _ = session_task.await;
  let _ = event_task.await;
  input_task.abort();
  Ok(())
}

fn report_event(event: ClientEvent) {
  match event {
    ClientEvent::ConnectionState(state) => {
      tracing::info!(?state, "connection state");
    }
    ClientEvent::Message { sender, text } => {
      tracing::info!("<{sender}> {text}");
    }
    ClientEvent::StatusChange { who, status } => {
      tracing::info!(who, ?status, "status change");
    }
    ClientEvent::FileOffer { cookie, from, file_name, size } => {
      let tag = cookie_tag(&cookie);
      tracing::info!(from, %file_name, size, "file offer [{tag}]; accept/decline with the tag");
    }
    ClientEvent::TransferProgress { cookie, bytes_done, bytes_total } => {
      let tag = cookie_tag(&cookie);
      tracing::info!("transfer [{tag}]: {bytes_done}/{bytes_total}");
    }
    ClientEvent::TransferComplete { cookie } => {
      let tag = cookie_tag(&cookie);
      tracing::info!("transfer [{tag}] complete");
    }
    ClientEvent::TransferFailed { cookie, reason } => {
      let tag = cookie_tag(&cookie);
      tracing::error!("transfer [{tag}] failed: {reason}");
    }
  }
}

fn cookie_tag(cookie: &[u8; 8]) -> String {
  String::from_utf8_lossy(&cookie[..7]).into_owned()
}

fn parse_cookie(tag: &str) -> Option<[u8; 8]> {
  let bytes = tag.as_bytes();
  if bytes.len() != 7 {
    return None;
  }
  let mut cookie = [0u8; 8];
  cookie[..7].copy_from_slice(bytes);
  Some(cookie)
}

/// Minimal line-based console: `msg <uin> <text>`, `send <uin> <path>`,
/// `share <path>`, `browse <uin>`, `im <uin>`, `status <word>`,
/// `accept <tag>`, `decline <tag>`, `quit`.
async fn read_commands(commands: mpsc::Sender<SessionCommand>, shutdown: CancellationToken) {
  let mut lines = BufReader::new(tokio::io::stdin()).lines();

  loop {
    let line = tokio::select! {
      _ = shutdown.cancelled() => return,
      line = lines.next_line() => match line {
        Ok(Some(line)) => line,
        _ => return,
      },
    };

    let mut parts = line.trim().splitn(3, ' ');
    let command = match (parts.next(), parts.next(), parts.next()) {
      (Some("msg"), Some(uin), Some(text)) => match uin.parse() {
        Ok(to) => SessionCommand::SendMessage { to, text: text.to_string() },
        Err(_) => {
          tracing::warn!("usage: msg <uin> <text>");
          continue;
        }
      },
      (Some("send"), Some(uin), Some(path)) => {
        let Ok(to) = uin.parse() else {
          tracing::warn!("usage: send <uin> <path>");
          continue;
        };
        match tokio::fs::read(path).await {
          Ok(data) => SessionCommand::SendFile {
            to,
            entry: FileEntry {
              name: file_name_of(path),
              modtime: 0,
              data: Bytes::from(data),
            },
            listing_only: false,
          },
          Err(e) => {
            tracing::warn!("cannot read {path}: {e}");
            continue;
          }
        }
      }
      (Some("share"), Some(path), None) => match tokio::fs::read(path).await {
        Ok(data) => SessionCommand::ShareFile {
          entry: FileEntry {
            name: file_name_of(path),
            modtime: 0,
            data: Bytes::from(data),
          },
        },
        Err(e) => {
          tracing::warn!("cannot read {path}: {e}");
          continue;
        }
      },
      (Some("browse"), Some(uin), None) => match uin.parse() {
        Ok(to) => SessionCommand::BrowseFiles { to },
        Err(_) => {
          tracing::warn!("usage: browse <uin>");
          continue;
        }
      },
      (Some("status"), Some(word), None) => match word {
        "available" => SessionCommand::SetStatus { status: UserStatus::Available },
        "away" => SessionCommand::SetStatus { status: UserStatus::Away },
        "invisible" => SessionCommand::SetStatus { status: UserStatus::Invisible },
        _ => {
          tracing::warn!("usage: status <available|away|invisible>");
          continue;
        }
      },
      (Some("im"), Some(uin), None) => match uin.parse() {
        Ok(to) => SessionCommand::ProposeDirectIm { to },
        Err(_) => {
          tracing::warn!("usage: im <uin>");
          continue;
        }
      },
      (Some("accept"), Some(tag), None) => match parse_cookie(tag) {
        Some(cookie) => SessionCommand::AcceptOffer { cookie },
        None => {
          tracing::warn!("usage: accept <7-character tag>");
          continue;
        }
      },
      (Some("decline"), Some(tag), None) => match parse_cookie(tag) {
        Some(cookie) => SessionCommand::DeclineOffer { cookie },
        None => {
          tracing::warn!("usage: decline <7-character tag>");
          continue;
        }
      },
      (Some("quit"), None, None) => SessionCommand::Logoff,
      (Some(""), None, None) | (None, ..) => continue,
      _ => {
        tracing::warn!("commands: msg, send, share, browse, im, status, accept, decline, quit");
        continue;
      }
    };

    if commands.send(command).await.is_err() {
      return;
    }
  }
}

fn file_name_of(path: &str) -> String {
  std::path::Path::new(path)
    .file_name()
    .map(|name| name.to_string_lossy().into_owned())
    .unwrap_or_else(|| path.to_string())
}
