//! Authentication contracts the handshake drivers call into (§4.4, §4.5).
//! Mapping credentials to domain roles is an external collaborator (§1); this
//! module defines only the shape of that collaboration.

use async_trait::async_trait;

use crate::envelope::{Authentication, AuthenticationScheme};
use crate::identity::Node;

/// The outcome of validating one authentication round-trip on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainRole {
    Unknown,
    Member,
    Authority,
    RootAuthority,
}

impl DomainRole {
    pub fn is_known(self) -> bool {
        !matches!(self, DomainRole::Unknown)
    }
}

/// Client-side authenticator callback (§4.4): invoked once per authenticating
/// round-trip with the scheme options currently on offer and the previous
/// server round-trip payload (`None` on the first call). Returns the next
/// `Authentication` to send.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        scheme_options: &[AuthenticationScheme],
        previous_round_trip: Option<&Authentication>,
    ) -> Authentication;
}

/// An authenticator that always answers with a fixed scheme, for guest
/// sessions and tests.
pub struct StaticAuthenticator {
    authentication: Authentication,
}

impl StaticAuthenticator {
    pub fn new(authentication: Authentication) -> Self {
        Self { authentication }
    }

    pub fn guest() -> Self {
        Self::new(Authentication::Guest)
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(
        &self,
        _scheme_options: &[AuthenticationScheme],
        _previous_round_trip: Option<&Authentication>,
    ) -> Authentication {
        self.authentication.clone()
    }
}

/// Server-side authentication callback (§4.5 step 4): validates one
/// authentication attempt and decides the resulting domain role, optionally
/// requesting another round-trip.
#[async_trait]
pub trait Authenticate: Send + Sync {
    async fn authenticate(
        &self,
        identity: &Node,
        authentication: &Authentication,
    ) -> (DomainRole, Option<Authentication>);
}

/// Server-side registration callback (§4.5 step 4): assigns the node the
/// server will address an authenticated peer as.
#[async_trait]
pub trait Register: Send + Sync {
    async fn register(&self, from: &Node) -> Node;
}

/// Accepts every `guest` authentication as a known member, registering the
/// peer under the node it presented. Useful for S1-style guest sessions and
/// tests; production deployments should supply a real credential store.
pub struct GuestAuthenticator;

#[async_trait]
impl Authenticate for GuestAuthenticator {
    async fn authenticate(
        &self,
        _identity: &Node,
        authentication: &Authentication,
    ) -> (DomainRole, Option<Authentication>) {
        match authentication {
            Authentication::Guest => (DomainRole::Member, None),
            _ => (DomainRole::Unknown, None),
        }
    }
}

#[async_trait]
impl Register for GuestAuthenticator {
    async fn register(&self, from: &Node) -> Node {
        from.clone()
    }
}
