use crate::store::{get_json, set_json, KvStore};
use quibble_core::StorageError;
use quibble_limbic::SessionState;

pub const SESSION_KEY: &str = "session:state";

/// Load the persisted mood and trait set, if any.
///
/// A stored state that fails structural validation is reported as corrupt
/// rather than silently accepted.
pub async fn load_session(store: &dyn KvStore) -> Result<Option<SessionState>, StorageError> {
    let state: Option<SessionState> = get_json(store, SESSION_KEY).await?;
    match state {
        Some(s) => match s.validate() {
            Ok(()) => Ok(Some(s)),
            Err(reason) => Err(StorageError::Corrupt {
                key: SESSION_KEY.to_string(),
                reason,
            }),
        },
        None => Ok(None),
    }
}

pub async fn save_session(store: &dyn KvStore, state: &SessionState) -> Result<(), StorageError> {
    set_json(store, SESSION_KEY, state, None).await?;
    tracing::debug!("Session state saved (mood {:.2})", state.mood.value());
    Ok(())
}
