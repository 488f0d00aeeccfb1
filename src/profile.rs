// User profile row
// The auth service owns email and password; the display name lives in the `users` table keyed
// by the auth user id.

use crate::backend::{Backend, BackendError, Filter};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

pub const USERS: &str = "users";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Name must not be blank")]
    BlankName,

    #[error(transparent)]
    Backend(#[from] BackendError),
}

// The stored name, or None when the row has no name yet
pub async fn fetch_profile_name(
    backend: &dyn Backend,
    user_id: &str,
) -> Result<Option<String>, BackendError> {
    let row = backend
        .single(USERS, &[Filter::eq("id", user_id)], &["name"])
        .await
        .map_err(|e| {
            error!("Error fetching profile of {}: {}", user_id, e);
            e
        })?;
    Ok(row.get("name").and_then(Value::as_str).map(str::to_string))
}

pub async fn update_profile_name(
    backend: &dyn Backend,
    user_id: &str,
    name: &str,
) -> Result<(), ProfileError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ProfileError::BlankName);
    }

    let updated = backend
        .update(USERS, &[Filter::eq("id", user_id)], json!({ "name": name }))
        .await?;
    if updated.is_empty() {
        return Err(BackendError::NotFound(USERS.to_string()).into());
    }

    info!("Updated profile name of {}", user_id);
    Ok(())
}
