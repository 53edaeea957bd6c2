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

//! Caller tiers and the plan-to-tier mapping table.

use serde::{Deserialize, Serialize};

/// Capability bucket for a caller. `free` is local-only, `pro` adds
/// snapshots and upstream analysis, `admin` is a superset for operational
/// access.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Admin,
}

impl Tier {
    /// The single deterministic mapping from a billing plan label to a tier.
    /// Unknown plans always land on `free`.
    pub fn from_plan(plan: &str) -> Self {
        match plan.trim().to_ascii_lowercase().as_str() {
            "admin" | "enterprise" | "internal" => Tier::Admin,
            "pro" | "team" | "business" | "premium" => Tier::Pro,
            _ => Tier::Free,
        }
    }

    /// Whether this tier satisfies a minimum-tier requirement.
    pub fn allows(self, minimum: Tier) -> bool {
        self >= minimum
    }

    /// Permissions every principal of this tier holds implicitly. A verifier
    /// may grant more; it can never grant fewer.
    pub fn default_permissions(self) -> &'static [&'static str] {
        match self {
            Tier::Free => &["analysis:local"],
            Tier::Pro => &[
                "analysis:local",
                "analysis:upstream",
                "snapshots:read",
                "snapshots:write",
            ],
            Tier::Admin => &[
                "analysis:local",
                "analysis:upstream",
                "snapshots:read",
                "snapshots:write",
                "admin:ops",
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Admin => "admin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_mapping_is_deterministic() {
        assert_eq!(Tier::from_plan("pro"), Tier::Pro);
        assert_eq!(Tier::from_plan("Team"), Tier::Pro);
        assert_eq!(Tier::from_plan("ENTERPRISE"), Tier::Admin);
        assert_eq!(Tier::from_plan("free"), Tier::Free);
        assert_eq!(Tier::from_plan("mystery-plan"), Tier::Free);
        assert_eq!(Tier::from_plan("  pro  "), Tier::Pro);
    }

    #[test]
    fn tier_ordering_gates_access() {
        assert!(Tier::Admin.allows(Tier::Pro));
        assert!(Tier::Pro.allows(Tier::Pro));
        assert!(!Tier::Free.allows(Tier::Pro));
        assert!(Tier::Free.allows(Tier::Free));
    }

    #[test]
    fn pro_defaults_include_snapshot_access() {
        assert!(Tier::Pro
            .default_permissions()
            .contains(&"snapshots:write"));
        assert!(!Tier::Free
            .default_permissions()
            .contains(&"snapshots:write"));
    }
}
