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

//! Content-addressed snapshot storage.
//!
//! Snapshots are immutable bundles of files with a stable id that is a pure
//! function of the file set, so identical inputs deduplicate to the same
//! record. State lives under the workspace-local `.snapback/` directory:
//! a bincode index file plus a blob directory keyed by content digest.

pub mod digest;
pub mod snapshot;
pub mod store;

pub use digest::{ContentDigest, DIGEST_ALGORITHM};
pub use snapshot::{snapshot_id, Snapshot, SnapshotFile};
pub use store::{
    CreateOutcome, NewSnapshotFile, RestoreOutcome, SnapshotError, SnapshotOptions,
    SnapshotStore, DEFAULT_LIST_CAP, STATE_DIR,
};
