//! Request-scope lifecycle (§4.7): mint a `requestID`, bind a store partition and a
//! temporary workspace to it, and guarantee both are released on every exit path —
//! including panic — the way `§4.7` requires.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::store::ResourceStore;

/// Owns one request's `requestID`, workspace directory, and store-partition binding.
/// Call [`RequestScope::teardown`] on the happy path; [`Drop`] is the safety net for
/// early returns, errors, and panics.
pub struct RequestScope {
    pub request_id: String,
    pub workspace: PathBuf,
    store: ResourceStore,
    torn_down: bool,
}

impl RequestScope {
    /// The store partition bound to this request.
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Mints a UUID `requestID` and provisions `<base_tmp_dir>/<requestID>` as the
    /// handler workspace.
    pub async fn begin(base_tmp_dir: &Path, store: ResourceStore) -> std::io::Result<Self> {
        let request_id = Uuid::new_v4().to_string();
        let workspace = base_tmp_dir.join(&request_id);
        tokio::fs::create_dir_all(&workspace).await?;
        Ok(Self {
            request_id,
            workspace,
            store,
            torn_down: false,
        })
    }

    /// Clears the store partition and deletes the workspace. Idempotent: safe to call
    /// once on the happy path and have [`Drop`] no-op afterward.
    pub async fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.store.clear_request(&self.request_id).await;
        let _ = tokio::fs::remove_dir_all(&self.workspace).await;
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        // Workspace removal must be synchronous here: Drop cannot await. Store
        // clearing is spawned detached, which requires an active Tokio runtime —
        // always true in practice since a RequestScope only ever lives inside a
        // request-handling task.
        let _ = std::fs::remove_dir_all(&self.workspace);
        let store = self.store.clone();
        let request_id = self.request_id.clone();
        tokio::spawn(async move {
            store.clear_request(&request_id).await;
        });
    }
}
