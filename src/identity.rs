//! Node and identity addressing (`name@domain/instance`).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A LIME identity: `name@domain`. Either part may be empty on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identity {
    pub name: String,
    pub domain: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.domain.is_empty()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.domain)
    }
}

impl FromStr for Identity {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((name, domain)) => Ok(Identity::new(name, domain)),
            None => Ok(Identity::new(s, "")),
        }
    }
}

impl TryFrom<String> for Identity {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Identity> for String {
    fn from(identity: Identity) -> Self {
        identity.to_string()
    }
}

/// A named network endpoint: identity plus an optional instance suffix,
/// serialized as `name@domain/instance`.
///
/// A zero `Node` (empty name, domain, and instance) serializes as absent —
/// callers should use `Option<Node>` at the envelope boundary rather than
/// relying on an empty `Node` round-tripping through JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Node {
    pub identity: Identity,
    pub instance: Option<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, domain: impl Into<String>, instance: Option<String>) -> Self {
        Self {
            identity: Identity::new(name, domain),
            instance,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.identity.is_empty() && self.instance.is_none()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.instance {
            Some(instance) if !instance.is_empty() => {
                write!(f, "{}/{}", self.identity, instance)
            }
            _ => write!(f, "{}", self.identity),
        }
    }
}

impl FromStr for Node {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((identity, instance)) => Ok(Node {
                identity: identity.parse()?,
                instance: Some(instance.to_string()),
            }),
            None => Ok(Node {
                identity: s.parse()?,
                instance: None,
            }),
        }
    }
}

impl TryFrom<String> for Node {
    type Error = std::convert::Infallible;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Node> for String {
    fn from(node: Node) -> Self {
        node.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_round_trips() {
        let id: Identity = "golang@limeprotocol.org".parse().unwrap();
        assert_eq!(id.name, "golang");
        assert_eq!(id.domain, "limeprotocol.org");
        assert_eq!(id.to_string(), "golang@limeprotocol.org");
    }

    #[test]
    fn identity_tolerates_missing_parts() {
        let id: Identity = "golang".parse().unwrap();
        assert_eq!(id.name, "golang");
        assert_eq!(id.domain, "");
    }

    #[test]
    fn node_round_trips_with_instance() {
        let node: Node = "golang@limeprotocol.org/home".parse().unwrap();
        assert_eq!(node.identity.name, "golang");
        assert_eq!(node.instance.as_deref(), Some("home"));
        assert_eq!(node.to_string(), "golang@limeprotocol.org/home");
    }

    #[test]
    fn node_without_instance_omits_slash() {
        let node: Node = "postmaster@limeprotocol.org".parse().unwrap();
        assert_eq!(node.to_string(), "postmaster@limeprotocol.org");
    }

    #[test]
    fn zero_node_is_zero() {
        assert!(Node::default().is_zero());
    }
}
