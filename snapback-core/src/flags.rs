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

//! Feature-flag snapshot. Readers see an immutable `Arc` snapshot; a
//! refresher swaps the whole map atomically, so lookups never block on a
//! refresh in progress.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Kill switch for routing analysis to the upstream ML service.
pub const ML_DETECTION: &str = "ml-detection";

#[derive(Debug, Default)]
pub struct FeatureFlags {
    inner: RwLock<Arc<HashMap<String, bool>>>,
}

impl FeatureFlags {
    pub fn new(initial: HashMap<String, bool>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(initial)),
        }
    }

    /// Current snapshot. Cheap to clone and safe to hold across awaits.
    pub fn snapshot(&self) -> Arc<HashMap<String, bool>> {
        self.inner.read().clone()
    }

    /// Replace the whole flag map (called by the background refresher).
    pub fn replace(&self, flags: HashMap<String, bool>) {
        *self.inner.write() = Arc::new(flags);
    }

    /// `None` when the flag is missing; callers apply their own default.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.inner.read().get(name).copied()
    }

    /// A missing flag is not "false": only an explicit `false` trips the
    /// kill switch.
    pub fn is_explicitly_false(&self, name: &str) -> bool {
        self.get(name) == Some(false)
    }
}
