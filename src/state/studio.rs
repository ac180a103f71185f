//! Studio identifiers, client roles, and studio-access scoping.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a studio or auxiliary chat channel.
///
/// The set of valid identifiers is fixed at startup by the configuration;
/// frames referencing unknown studios are dropped by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudioId(String);

impl StudioId {
    /// Wrap a raw identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudioId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Role of a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Screens calls and manages every studio.
    Producer,
    /// On-air talent bound to a single studio.
    Talent,
}

/// Direction of a buzzer signal between the two roles of a studio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BuzzerDirection {
    /// Producer signalling the talent booth.
    ProducerToTalent,
    /// Talent signalling the producer desk.
    TalentToProducer,
}

impl BuzzerDirection {
    /// Both directions, in a stable order (used when polling a studio).
    pub const ALL: [BuzzerDirection; 2] = [
        BuzzerDirection::ProducerToTalent,
        BuzzerDirection::TalentToProducer,
    ];

    /// Direction implied by the sending role.
    pub fn from_sender(role: Role) -> Self {
        match role {
            Role::Producer => BuzzerDirection::ProducerToTalent,
            Role::Talent => BuzzerDirection::TalentToProducer,
        }
    }

    /// Role on the sending side of this direction.
    pub fn sender(self) -> Role {
        match self {
            BuzzerDirection::ProducerToTalent => Role::Producer,
            BuzzerDirection::TalentToProducer => Role::Talent,
        }
    }

    /// Role on the receiving side of this direction.
    pub fn receiver(self) -> Role {
        match self {
            BuzzerDirection::ProducerToTalent => Role::Talent,
            BuzzerDirection::TalentToProducer => Role::Producer,
        }
    }
}

/// Studio-access scope granted to a client session.
///
/// A producer sees every studio; talent is pinned to exactly one. The
/// reconciler consults the scope before applying any incoming event so a
/// client never observes another studio's traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientScope {
    /// Full access to every configured studio and aux channel.
    Producer,
    /// Access restricted to a single studio.
    Talent(StudioId),
}

impl ClientScope {
    /// Role carried by this scope.
    pub fn role(&self) -> Role {
        match self {
            ClientScope::Producer => Role::Producer,
            ClientScope::Talent(_) => Role::Talent,
        }
    }

    /// Whether events for `studio` may be delivered to this client.
    pub fn allows(&self, studio: &StudioId) -> bool {
        match self {
            ClientScope::Producer => true,
            ClientScope::Talent(own) => own == studio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn talent_scope_is_pinned_to_one_studio() {
        let scope = ClientScope::Talent(StudioId::from("studio-2"));
        assert!(scope.allows(&StudioId::from("studio-2")));
        assert!(!scope.allows(&StudioId::from("studio-1")));
        assert_eq!(scope.role(), Role::Talent);
    }

    #[test]
    fn producer_scope_allows_everything() {
        let scope = ClientScope::Producer;
        assert!(scope.allows(&StudioId::from("tech")));
        assert!(scope.allows(&StudioId::from("studio-4")));
    }

    #[test]
    fn direction_maps_to_roles() {
        assert_eq!(
            BuzzerDirection::from_sender(Role::Producer),
            BuzzerDirection::ProducerToTalent
        );
        assert_eq!(BuzzerDirection::TalentToProducer.receiver(), Role::Producer);
    }
}
