// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Snapshot records and the stable id scheme.
//!
//! The id is a pure function of the file set: entries are sorted by path in
//! byte-lexicographic order, each content digested, the pairs joined as
//! `"path:digest"` with `|`, and the joined string digested again. Two
//! identical file sets therefore always produce the same id, which is what
//! deduplication keys on.

use crate::digest::ContentDigest;
use serde::{Deserialize, Serialize};

/// One file entry inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub path: String,
    /// Hex digest of the file content; also the blob key.
    pub digest: String,
    pub size: u64,
}

/// An immutable, content-addressed bundle of files.
///
/// The record round-trips through both JSON (tool responses) and bincode
/// (the index file), so every field is always present on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
    pub description: Option<String>,
    pub protected: bool,
    /// Sorted by path, byte-lexicographic.
    pub files: Vec<SnapshotFile>,
}

/// Compute the stable snapshot id for a set of `(path, digest)` pairs.
/// The input order does not matter.
pub fn snapshot_id(entries: &[(String, ContentDigest)]) -> String {
    let mut sorted: Vec<&(String, ContentDigest)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));

    let joined = sorted
        .iter()
        .map(|(path, digest)| format!("{path}:{}", digest.to_hex()))
        .collect::<Vec<_>>()
        .join("|");

    ContentDigest::from_content(joined.as_bytes()).to_hex()
}
