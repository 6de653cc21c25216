//! `tablecast login`: exchange credentials for a session token.

use secrecy::SecretString;

use tablecast_config as config;

use crate::cli::{GlobalOpts, LoginArgs};
use crate::commands::Backend;
use crate::error::CliError;

pub async fn handle(args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let backend = Backend::resolve(global)?;
    let profile = backend.profile.clone().unwrap_or_default();

    let username = match args.username {
        Some(name) => name,
        None => config::resolve_username(&profile, &backend.profile_name)?,
    };
    let password = match config::resolve_password(&profile, &backend.profile_name) {
        Ok(pw) => pw,
        Err(config::ConfigError::NoCredentials { .. }) => prompt_password()?,
        Err(e) => return Err(e.into()),
    };

    let session = backend
        .client()?
        .login(&username, &password)
        .await
        .map_err(|e| match CliError::from(e) {
            CliError::AuthFailed { message, .. } => CliError::AuthFailed {
                profile: backend.profile_name.clone(),
                message,
            },
            other => other,
        })?;

    eprintln!(
        "Signed in as {} ({}) on profile '{}'",
        session.username,
        if session.roles.is_empty() {
            "no roles".to_owned()
        } else {
            session.roles.join(", ")
        },
        backend.profile_name
    );
    Ok(())
}

fn prompt_password() -> Result<SecretString, CliError> {
    let pass = rpassword::prompt_password("Password: ")?;
    if pass.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password cannot be empty".into(),
        });
    }
    Ok(SecretString::from(pass))
}
