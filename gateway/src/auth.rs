use anyhow::{anyhow, Result};
use async_trait::async_trait;

use ptt_core::ids::UserId;
use ptt_core::model::{Permission, Principal};

/// Identity collaborator (§6.1 of the channel coordinator contract):
/// resolves a bearer token into an already-authenticated principal. A
/// production deployment swaps this for a JWT-validating implementation;
/// that is explicitly out of scope here.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, bearer: &str) -> Result<Principal>;
}

/// Development/test stand-in: accepts tokens of the form
/// `<prefix>.<user_id>.<cap1,cap2,...>`, e.g. `dev.alice.read,write,emergency`.
/// Grounded on the teacher's `DevAuthProvider` pattern of one trivial,
/// pluggable implementation behind the trait.
pub struct StaticAuthProvider {
    prefix: String,
}

impl StaticAuthProvider {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self, bearer: &str) -> Result<Principal> {
        let mut parts = bearer.splitn(3, '.');
        let prefix = parts.next().ok_or_else(|| anyhow!("malformed token"))?;
        if prefix != self.prefix {
            return Err(anyhow!("unrecognized token prefix"));
        }
        let user_id = parts.next().ok_or_else(|| anyhow!("missing user_id segment"))?;
        if user_id.is_empty() {
            return Err(anyhow!("empty user_id segment"));
        }
        let caps = parts.next().unwrap_or("read,write");

        let permissions = caps
            .split(',')
            .filter(|s| !s.is_empty())
            .map(|cap| match cap {
                "read" => Ok(Permission::Read),
                "write" => Ok(Permission::Write),
                "emergency" => Ok(Permission::Emergency),
                "admin" => Ok(Permission::Admin),
                other => Err(anyhow!("unknown capability: {other}")),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Principal {
            user_id: UserId::new(user_id),
            username: user_id.to_string(),
            permissions,
        })
    }
}
