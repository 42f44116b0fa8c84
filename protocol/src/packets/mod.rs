//! Control-channel packet types.

mod login;
mod rendezvous;

pub use login::LoginRequest;
pub use rendezvous::{tlv_kind, FileInfo, RendezvousKind, RendezvousPropose};

use crate::consts::{Uin, UserStatus};

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
  /// Welcome packet with the per-session key for password hashing (S → C).
  /// Sent by the server immediately after the transport connects.
  Welcome { key: u32 },
  /// Login packet (C → S).
  /// Carries the UIN and the legacy hash of the password and key.
  Login(LoginRequest),
  /// Login successful (S → C).
  LoginOk,
  /// Login failed (S → C).
  LoginFailed,
  /// Ping (C → S). Keeps the control connection alive.
  Ping,
  /// Pong (S → C).
  Pong,
  /// Disconnect (S → C). Server is about to close the connection.
  Disconnect,
  /// Change own presence (C → S).
  SetStatus { status: UserStatus },
  /// Send message (C → S).
  SendMessage { recipient: Uin, seq: u32, text: String },
  /// Receive message (S → C).
  RecvMessage { sender: Uin, seq: u32, time: u32, text: String },
  /// Contact status change (S → C).
  StatusChange { who: Uin, status: UserStatus },
  /// Rendezvous proposal carrying the TLV-encoded invite (both directions).
  RendezvousPropose(RendezvousPropose),
  /// Rendezvous accept; echoes the proposal cookie and its kind code
  /// (both directions).
  RendezvousAccept { cookie: [u8; 8], kind: u16 },
  /// Rendezvous cancel or decline (both directions).
  RendezvousCancel { cookie: [u8; 8], kind: u16 },
}
