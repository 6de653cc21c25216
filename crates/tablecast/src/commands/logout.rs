//! `tablecast logout`: forget the saved session.

use tablecast_api::SessionStore;

use crate::cli::GlobalOpts;
use crate::commands::Backend;
use crate::error::CliError;

pub fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let backend = Backend::resolve(global)?;
    let was_logged_in = backend.session.is_logged_in();
    backend.client()?.logout();

    if was_logged_in {
        eprintln!("Signed out of profile '{}'", backend.profile_name);
    } else {
        eprintln!("Profile '{}' had no saved session", backend.profile_name);
    }
    Ok(())
}
