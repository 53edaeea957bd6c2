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

//! Content digests. The digest function is fixed and versioned: changing it
//! would change every snapshot id, so the identifier below is part of the
//! on-disk format.

use serde::{Deserialize, Serialize};

/// Identifier of the digest function used for snapshot ids and blob keys.
pub const DIGEST_ALGORITHM: &str = "blake3-v1";

/// 32-byte BLAKE3 digest of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn from_content(content: &[u8]) -> Self {
        Self(blake3::hash(content).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Option<Self> {
        let bytes = hex::decode(hex_str).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = ContentDigest::from_content(b"hello");
        let b = ContentDigest::from_content(b"hello");
        let c = ContentDigest::from_content(b"world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn hex_round_trip() {
        let digest = ContentDigest::from_content(b"round trip");
        let parsed = ContentDigest::from_hex(&digest.to_hex()).unwrap();
        assert_eq!(digest, parsed);
        assert_eq!(digest.to_hex().len(), 64);
    }

    #[test]
    fn invalid_hex_is_rejected() {
        assert!(ContentDigest::from_hex("zz").is_none());
        assert!(ContentDigest::from_hex("abcd").is_none());
    }
}
