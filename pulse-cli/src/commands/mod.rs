//! Subcommand implementations.

pub mod config;
pub mod emit;
pub mod health;
pub mod listen;

use pulse_realtime::{Credentials, RealtimeClient, RealtimeConfig};
use pulse_telemetry::masking::Sensitive;

/// Identity flags shared by commands that open a session.
#[derive(clap::Args, Debug, Clone)]
pub struct SessionArgs {
    /// User id to authenticate as
    #[arg(short, long, env = "PULSE_USER_ID")]
    pub user: String,

    /// Organisation id
    #[arg(short, long, env = "PULSE_ORG_ID")]
    pub org: String,

    /// Session token
    #[arg(long, env = "PULSE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
}

impl SessionArgs {
    /// Credentials described by the flags.
    pub fn credentials(&self) -> Credentials {
        let credentials = Credentials::new(&self.user, &self.org);
        match &self.token {
            Some(token) => credentials.with_token(token.clone()),
            None => credentials,
        }
    }

    /// Token wrapped for logging.
    pub fn masked_token(&self) -> Option<Sensitive<&str>> {
        self.token.as_deref().map(Sensitive::new)
    }
}

/// Builds a client from the loaded configuration.
pub fn client(config: &RealtimeConfig) -> anyhow::Result<RealtimeClient> {
    Ok(RealtimeClient::new(config.clone())?)
}
