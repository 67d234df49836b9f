//! The persisted state blob.
//!
//! Everything a node must remember across restarts lives in one JSON value
//! under the `APP_STATE` key: every group's identity, name, local peer id
//! and event log, plus the active-group UI hint. Writes replace the whole
//! blob; reads tolerate absence and malformed JSON by starting empty.

use std::collections::HashMap;

use rusqlite::params;
use serde::{Deserialize, Serialize};

use cercle_shared::constants::STATE_KEY;
use cercle_shared::{Event, GroupId, PeerId};

use crate::database::Store;
use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersistedState {
    pub groups: HashMap<GroupId, PersistedGroup>,
    pub active_group_id: Option<GroupId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedGroup {
    pub id: GroupId,
    pub name: String,
    pub my_peer_id: PeerId,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Store {
    /// Load the state blob. Absent or unreadable state yields the empty
    /// default; it will be overwritten wholesale on the next save.
    pub fn load_state(&self) -> Result<PersistedState> {
        let mut stmt = self
            .conn()
            .prepare("SELECT value FROM app_state WHERE key = ?1")?;
        let mut rows = stmt.query(params![STATE_KEY])?;

        let Some(row) = rows.next()? else {
            return Ok(PersistedState::default());
        };
        let json: String = row.get(0)?;

        match serde_json::from_str(&json) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(error = %e, "persisted state unreadable, starting empty");
                Ok(PersistedState::default())
            }
        }
    }

    /// Replace the state blob.
    pub fn save_state(&self, state: &PersistedState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO app_state (key, value) VALUES (?1, ?2)",
            params![STATE_KEY, json],
        )?;
        Ok(())
    }
}
