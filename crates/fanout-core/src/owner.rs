use std::fmt;
use uuid::Uuid;

/// Opaque identifier minted fresh per dispatcher run and stamped into the `lease_owner` column
/// while a row is `InFlight`. Never reused across runs (§8 "owner tokens are pairwise distinct").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for OwnerToken {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successive_tokens_are_distinct() {
        let a = OwnerToken::new();
        let b = OwnerToken::new();
        assert_ne!(a, b);
    }
}
