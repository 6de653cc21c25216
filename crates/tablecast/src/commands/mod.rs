//! Command handlers and the backend context they share.

pub mod config_cmd;
pub mod login;
pub mod logout;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use tablecast_api::{ApiClient, SessionStore};
use tablecast_config::{self as config, KeyringSessionStore, Profile};
use tablecast_core::{BackendConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything a backend-facing command needs: the resolved profile, its
/// runtime config, and the persisted session.
pub struct Backend {
    pub profile_name: String,
    pub profile: Option<Profile>,
    pub config: BackendConfig,
    pub session: Arc<KeyringSessionStore>,
}

impl Backend {
    /// Resolve from the config file, the active profile, and CLI overrides.
    pub fn resolve(global: &GlobalOpts) -> Result<Self, CliError> {
        let cfg = config::load_config()?;
        let profile_name = cfg.active_profile_name(global.profile.as_deref());
        let profile = cfg.profiles.get(&profile_name);

        let mut backend_config = match (profile, global.base_url.as_deref()) {
            (Some(profile), _) => config::profile_to_backend_config(profile, &cfg.defaults)?,
            (None, Some(url)) => BackendConfig::new(parse_base_url(url)?),
            (None, None) => {
                let no_config = || CliError::NoConfig {
                    path: config::config_path().display().to_string(),
                };
                // An explicitly requested profile that doesn't exist is a typo;
                // a missing default profile means nothing is set up yet.
                return Err(match global.profile {
                    Some(_) => cfg
                        .profile(&profile_name)
                        .err()
                        .map_or_else(no_config, CliError::from),
                    None => no_config(),
                });
            }
        };

        if let Some(url) = global.base_url.as_deref() {
            backend_config.base_url = parse_base_url(url)?;
        }
        if global.insecure {
            backend_config.tls = TlsVerification::DangerAcceptInvalid;
        }
        if let Some(secs) = global.timeout {
            backend_config.timeout = Duration::from_secs(secs);
        }

        let session = Arc::new(KeyringSessionStore::open(&profile_name)?);
        tracing::debug!(
            profile = %profile_name,
            base_url = %backend_config.base_url,
            logged_in = session.is_logged_in(),
            "resolved backend"
        );

        Ok(Self {
            profile: profile.cloned(),
            profile_name,
            config: backend_config,
            session,
        })
    }

    /// REST client sharing this backend's session.
    pub fn client(&self) -> Result<ApiClient, CliError> {
        Ok(ApiClient::new(
            self.config.base_url.clone(),
            self.session.clone(),
            &self.config.transport(),
        )?)
    }
}

fn parse_base_url(raw: &str) -> Result<url::Url, CliError> {
    raw.parse().map_err(|_| CliError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL: {raw}"),
    })
}
