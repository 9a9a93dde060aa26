//! Claims context attached to remote calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Claims sent along with a remote call.
pub type Claims = Map<String, Value>;

/// Scope a claim is made for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Scope {
    User,
    Group,
    GroupRole,
}

impl Scope {
    /// Wire representation of this scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Group => "group",
            Self::GroupRole => "groupRole",
        }
    }
}

/// Database connection scope.
pub type ConnectionType = Scope;
/// Log collection scope.
pub type LogType = Scope;
/// Cache scope.
pub type CacheType = Scope;

/// The kind of claim requested from a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    Db(ConnectionType),
    Log(LogType),
    Cache(CacheType),
}

impl ClaimKind {
    const fn key(self) -> &'static str {
        match self {
            Self::Db(_) => "connectionType",
            Self::Log(_) => "logType",
            Self::Cache(_) => "cacheType",
        }
    }

    const fn scope(self) -> Scope {
        match self {
            Self::Db(scope) | Self::Log(scope) | Self::Cache(scope) => scope,
        }
    }
}

/// Which claim scopes each context may request.
const CAPABILITIES: [(Scope, &[Scope]); 3] = [
    (Scope::User, &[Scope::User]),
    (Scope::Group, &[Scope::User, Scope::Group]),
    (Scope::GroupRole, &[Scope::User, Scope::Group, Scope::GroupRole]),
];

/// Identity a session acts as when calling other components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "as", rename_all = "camelCase")]
pub enum ClaimsContext {
    #[default]
    User,
    Group { group: String },
    GroupRole { group: String, role: String },
}

impl ClaimsContext {
    /// Act as a group.
    #[must_use]
    pub fn group(group: impl Into<String>) -> Self {
        Self::Group {
            group: group.into(),
        }
    }

    /// Act as a role within a group.
    #[must_use]
    pub fn group_role(group: impl Into<String>, role: impl Into<String>) -> Self {
        Self::GroupRole {
            group: group.into(),
            role: role.into(),
        }
    }

    /// The widest scope this context may claim.
    #[must_use]
    pub const fn scope(&self) -> Scope {
        match self {
            Self::User => Scope::User,
            Self::Group { .. } => Scope::Group,
            Self::GroupRole { .. } => Scope::GroupRole,
        }
    }

    /// Whether this context may make claims in `scope`.
    #[must_use]
    pub fn allows(&self, scope: Scope) -> bool {
        let own = self.scope();
        CAPABILITIES
            .iter()
            .find(|(context, _)| *context == own)
            .is_some_and(|(_, allowed)| allowed.contains(&scope))
    }

    /// Build the claims for `kind`.
    ///
    /// # Errors
    /// Returns [`Error::ClaimScope`] if the context may not claim that scope.
    pub fn claims(&self, kind: ClaimKind) -> Result<Claims> {
        self.claims_with(kind, Claims::new())
    }

    /// Build the claims for `kind` on top of `additional` claims.
    ///
    /// Scoping keys always win over entries in `additional`.
    ///
    /// # Errors
    /// Returns [`Error::ClaimScope`] if the context may not claim that scope.
    pub fn claims_with(&self, kind: ClaimKind, additional: Claims) -> Result<Claims> {
        if !self.allows(kind.scope()) {
            return Err(Error::ClaimScope {
                context: self.scope().as_str(),
                requested: format!("{}={}", kind.key(), kind.scope().as_str()),
            });
        }

        let mut claims = additional;
        claims.insert(kind.key().to_string(), kind.scope().as_str().into());
        match self {
            Self::User => {}
            Self::Group { group } => {
                claims.insert("asGroup".to_string(), group.clone().into());
            }
            Self::GroupRole { group, role } => {
                claims.insert("asGroup".to_string(), group.clone().into());
                claims.insert("asRole".to_string(), role.clone().into());
            }
        }
        Ok(claims)
    }

    /// Database claims in this context's own scope.
    ///
    /// # Errors
    /// Never fails for the context's own scope; kept fallible for symmetry.
    pub fn default_db_claims(&self) -> Result<Claims> {
        self.claims(ClaimKind::Db(self.scope()))
    }

    /// Log claims in this context's own scope.
    ///
    /// # Errors
    /// Never fails for the context's own scope; kept fallible for symmetry.
    pub fn default_log_claims(&self) -> Result<Claims> {
        self.claims(ClaimKind::Log(self.scope()))
    }

    /// Cache claims in this context's own scope.
    ///
    /// # Errors
    /// Never fails for the context's own scope; kept fallible for symmetry.
    pub fn default_cache_claims(&self) -> Result<Claims> {
        self.claims(ClaimKind::Cache(self.scope()))
    }
}
