//! Caller identity boundary
//!
//! Token issuance and validation live outside this server. The network layer
//! only needs to turn a presented token into a player, which is all the
//! [`IdentityProvider`] trait asks for.

use shared::Player;
use std::collections::HashMap;
use uuid::Uuid;

pub trait IdentityProvider: Send + Sync {
    /// Resolves a bearer token to the player it identifies
    fn identify(&self, token: &str) -> Option<Player>;
}

/// Fixed token table, used by the binary's `--player` flags and by tests
#[derive(Debug, Clone, Default)]
pub struct StaticIdentities {
    players: HashMap<String, Player>,
}

impl StaticIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `token` for a new player called `username` and returns it
    pub fn register(&mut self, token: impl Into<String>, username: impl Into<String>) -> Player {
        let player = Player::new(Uuid::new_v4(), username);
        self.players.insert(token.into(), player.clone());
        player
    }

    pub fn insert(&mut self, token: impl Into<String>, player: Player) {
        self.players.insert(token.into(), player);
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl IdentityProvider for StaticIdentities {
    fn identify(&self, token: &str) -> Option<Player> {
        self.players.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_token_resolves() {
        let mut identities = StaticIdentities::new();
        let alice = identities.register("tok-alice", "alice");

        assert_eq!(identities.identify("tok-alice"), Some(alice));
        assert_eq!(identities.len(), 1);
    }

    #[test]
    fn test_unknown_token_is_rejected() {
        let mut identities = StaticIdentities::new();
        identities.register("tok-alice", "alice");

        assert!(identities.identify("tok-bob").is_none());
        assert!(identities.identify("").is_none());
    }

    #[test]
    fn test_insert_keeps_player_id() {
        let mut identities = StaticIdentities::new();
        let player = Player::new(Uuid::new_v4(), "carol");
        identities.insert("t", player.clone());

        assert_eq!(identities.identify("t").map(|p| p.id), Some(player.id));
    }
}
