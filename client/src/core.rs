use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use local_ip_address::local_ip;
use serde::{Deserialize, Serialize};
use oft_protocol::consts::port;
use oft_protocol::Uin;
use crate::session::Transport;

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ClientConfig {
  pub uin: Uin,
  pub password: String,
  pub server: String,
  pub http_port: u16,
  pub direct_port: u16,
  pub https_port: u16,
  pub resolve_timeout_secs: u64,
  pub login_timeout_secs: u64,
  pub ping_interval_secs: u64,
  pub cookie_max_age_secs: u64,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      uin: 0,
      password: String::new(),
      server: "login.oscar-retro.local".to_string(),
      http_port: port::HTTP,
      direct_port: port::DIRECT,
      https_port: port::HTTPS,
      resolve_timeout_secs: 10,
      login_timeout_secs: 60,
      ping_interval_secs: 60,
      cookie_max_age_secs: 60,
    }
  }
}

impl ClientConfig {
  /// Connect fallback chain for pure connectivity failures. HTTP tunnel is
  /// tried first (restrictive networks), then the native port, then the
  /// HTTPS port as a last resort. Authentication failures never re-enter
  /// this chain.
  pub fn transport_chain(&self) -> [Transport; 3] {
    [
      Transport::HttpTunnel(self.http_port),
      Transport::Direct(self.direct_port),
      Transport::HttpsPort(self.https_port),
    ]
  }

  pub fn resolve_timeout(&self) -> Duration {
    Duration::from_secs(self.resolve_timeout_secs)
  }

  pub fn login_timeout(&self) -> Duration {
    Duration::from_secs(self.login_timeout_secs)
  }

  pub fn ping_interval(&self) -> Duration {
    Duration::from_secs(self.ping_interval_secs)
  }

  pub fn cookie_max_age(&self) -> Duration {
    Duration::from_secs(self.cookie_max_age_secs)
  }
}

/// Shared client state: configuration plus the local address advertised in
/// rendezvous invites. Everything a session or transfer task needs, behind
/// one Arc.
#[derive(Debug)]
pub struct ClientState {
  config: ClientConfig,
  host_ip: Ipv4Addr,
}

pub type SharedClientState = Arc<ClientState>;

impl ClientState {
  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  /// Local IPv4 address embedded in rendezvous proposals so the peer can
  /// connect back to our transfer listener.
  pub fn host_ip(&self) -> Ipv4Addr {
    self.host_ip
  }

  #[cfg(test)]
  pub fn for_tests(config: ClientConfig) -> SharedClientState {
    Self::for_tests_with_ip(config, Ipv4Addr::LOCALHOST)
  }

  #[cfg(test)]
  pub fn for_tests_with_ip(config: ClientConfig, host_ip: Ipv4Addr) -> SharedClientState {
    Arc::new(Self { config, host_ip })
  }
}

pub fn create_client_state() -> Result<SharedClientState, figment::Error> {
  let config: ClientConfig = Figment::new()
    .merge(Serialized::defaults(ClientConfig::default()))
    .merge(Toml::file("oscar-retro.toml"))
    .merge(Env::prefixed("OSCAR_RETRO_"))
    .extract()?;

  let host_ip = match local_ip() {
    Ok(IpAddr::V4(ip)) => ip,
    _ => Ipv4Addr::UNSPECIFIED,
  };

  tracing::debug!(?config.server, ?host_ip, "client state created");
  Ok(Arc::new(ClientState { config, host_ip }))
}
