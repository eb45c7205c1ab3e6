//! Glare resolution roles.

use common::types::ConnectionId;

/// Which side of a pair yields when both send offers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Rolls back its own offer and accepts the peer's.
    Polite,
    /// Ignores the peer's offer; its own offer wins.
    Impolite,
}

impl Role {
    /// Role of `local` when paired with `remote`.
    ///
    /// The lexicographically smaller id is polite. Both ends compute the
    /// same answer without exchanging anything.
    #[must_use]
    pub fn for_pair(local: &ConnectionId, remote: &ConnectionId) -> Self {
        if local.as_str() < remote.as_str() {
            Role::Polite
        } else {
            Role::Impolite
        }
    }

    #[must_use]
    pub fn is_polite(self) -> bool {
        self == Role::Polite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_complementary() {
        let a = ConnectionId::from("alpha");
        let b = ConnectionId::from("bravo");

        assert_eq!(Role::for_pair(&a, &b), Role::Polite);
        assert_eq!(Role::for_pair(&b, &a), Role::Impolite);
    }

    #[test]
    fn test_comparison_is_byte_order() {
        let upper = ConnectionId::from("Zed");
        let lower = ConnectionId::from("abe");

        assert!(Role::for_pair(&upper, &lower).is_polite());
        assert!(!Role::for_pair(&lower, &upper).is_polite());
    }
}
