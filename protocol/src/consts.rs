//! Protocol constants.

/// Frame kind codes for the control-channel `{kind, length}` header.
pub mod frame_kind {
  /// Welcome packet (S → C) - carries the per-session key for the login hash.
  pub const WELCOME: u32 = 0x0001;
  /// Change own status (C → S).
  pub const NEW_STATUS: u32 = 0x0002;
  /// Login success (S → C).
  pub const LOGIN_OK: u32 = 0x0003;
  /// Pong (S → C) - response to ping.
  pub const PONG: u32 = 0x0007;
  /// Ping (C → S) - keep connection alive.
  pub const PING: u32 = 0x0008;
  /// Login failure (S → C).
  pub const LOGIN_FAILED: u32 = 0x0009;
  /// Receive message (S → C).
  pub const RECV_MSG: u32 = 0x000a;
  /// Send message (C → S).
  pub const SEND_MSG: u32 = 0x000b;
  /// Disconnecting (S → C) - server closing connection.
  pub const DISCONNECTING: u32 = 0x000c;
  /// Contact status change (S → C).
  pub const STATUS_CHANGE: u32 = 0x000f;
  /// Login packet (C → S) - hashed credentials.
  pub const LOGIN: u32 = 0x0015;
  /// Rendezvous proposal (both directions) - TLV-encoded invite.
  pub const RENDEZVOUS_PROPOSE: u32 = 0x001a;
  /// Rendezvous accept (both directions) - echoes the proposal cookie.
  pub const RENDEZVOUS_ACCEPT: u32 = 0x001b;
  /// Rendezvous cancel/decline (both directions).
  pub const RENDEZVOUS_CANCEL: u32 = 0x001c;
}

/// Hard ceiling on a control frame's declared payload length. A header
/// claiming more than this is treated as stream corruption, never retried.
pub const MAX_FRAME_LEN: u32 = 65535;

/// Length of a rendezvous correlation cookie: 7 printable bytes + NUL, for
/// compatibility with text-based companion protocols.
pub const COOKIE_LEN: usize = 8;

pub type Uin = u32;

/// Client version advertised in the login packet.
pub const CLIENT_VERSION: u32 = 0x20;

/// Well-known ports for the connect fallback chain.
pub mod port {
  /// Direct control-channel port.
  pub const DIRECT: u16 = 5190;
  /// HTTP tunnel port, tried first on restrictive networks.
  pub const HTTP: u16 = 80;
  /// HTTPS port, last resort for connectivity fallback.
  pub const HTTPS: u16 = 443;
}

/// Rendezvous capability GUIDs embedded in proposal payloads.
pub mod caps {
  pub const DIRECT_IM: [u8; 16] = [
    0x09, 0x46, 0x13, 0x45, 0x4c, 0x7f, 0x11, 0xd1,
    0x82, 0x22, 0x44, 0x45, 0x53, 0x54, 0x00, 0x00,
  ];
  pub const SEND_FILE: [u8; 16] = [
    0x09, 0x46, 0x13, 0x43, 0x4c, 0x7f, 0x11, 0xd1,
    0x82, 0x22, 0x44, 0x45, 0x53, 0x54, 0x00, 0x00,
  ];
  pub const GET_FILE: [u8; 16] = [
    0x09, 0x46, 0x13, 0x48, 0x4c, 0x7f, 0x11, 0xd1,
    0x82, 0x22, 0x44, 0x45, 0x53, 0x54, 0x00, 0x00,
  ];
}

/// User presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum UserStatus {
  /// Not available.
  #[default]
  Offline = 0x0001,
  /// Available.
  Available = 0x0002,
  /// Away from keyboard.
  Away = 0x0003,
  /// Signed in but hidden from contacts.
  Invisible = 0x0014,
}

impl TryFrom<u32> for UserStatus {
  type Error = u32;

  fn try_from(value: u32) -> Result<Self, Self::Error> {
    match value {
      0x0001 => Ok(UserStatus::Offline),
      0x0002 => Ok(UserStatus::Available),
      0x0003 => Ok(UserStatus::Away),
      0x0014 => Ok(UserStatus::Invisible),
      _ => Err(value),
    }
  }
}
