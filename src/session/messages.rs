//! Message types for the session connection.
//!
//! Requests flow client → server, replies flow back on the same connection:
//! - [`SessionRequest::Directory`] asks for the full name → id listing
//! - [`SessionRequest::Subscribe`] selects the ids streamed as value batches
//! - Set-value and execute are id-addressed, resolved through the directory
//!
//! Ids are assigned by the server per connection and mean nothing after a
//! reconnect; the client re-requests the directory before reusing any.

use crate::core::types::DatarefValue;
use serde::{Deserialize, Serialize};

/// One directory row: a name the server knows and its numeric id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub id: u64,
}

/// One streamed value: the dataref id and its current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueUpdate {
    pub id: u64,
    pub value: DatarefValue,
}

/// Client → server requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionRequest {
    /// Request the full name → id directory
    Directory,
    /// Select the dataref ids to stream
    Subscribe { dataref_ids: Vec<u64> },
    /// Write a dataref by id
    SetValue { dataref_id: u64, value: DatarefValue },
    /// Activate a command by id, held for `duration` seconds
    Execute { command_id: u64, duration: f32 },
}

/// Server → client replies and stream messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionReply {
    /// Full directory listing
    Directory {
        datarefs: Vec<DirectoryEntry>,
        commands: Vec<DirectoryEntry>,
    },
    /// Batch of current values for subscribed ids
    Values { updates: Vec<ValueUpdate> },
}
