//! Access controller
//!
//! Maps a presented credential or ingestion key to an immutable
//! [`Permission`]. Configuration reloads never mutate a live permission;
//! sessions re-derive theirs on their next message.

use chrono::{DateTime, Utc};
use radiocast_core::types::{ConfigSnapshot, Scope, SystemId, TalkgroupId};

/// Why a credential was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reject {
    /// No such credential or key
    Unknown,

    /// The credential's expiration has passed
    Expired,

    /// The key is disabled
    Disabled,
}

/// The effective rights derived from a credential
#[derive(Debug, Clone, PartialEq)]
pub struct Permission {
    /// The credential code this permission was derived from
    pub code: String,

    /// Human-readable identity, for logs
    pub ident: Option<String>,

    /// Allowed systems and talkgroups
    pub scope: Scope,

    /// Concurrent session cap
    pub limit: Option<u32>,

    /// When the permission stops being valid
    pub expiration: Option<DateTime<Utc>>,
}

impl Permission {
    /// Whether the permission admits the given pair
    #[must_use]
    pub fn allows(&self, system: SystemId, talkgroup: TalkgroupId) -> bool {
        self.scope.allows(system, talkgroup)
    }

    /// Whether the expiration instant has passed
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expiration.is_some_and(|at| at <= Utc::now())
    }
}

/// Resolve a listener credential
///
/// # Errors
///
/// Rejects unknown and expired credentials.
pub fn resolve_credential(
    snapshot: &ConfigSnapshot,
    code: &str,
) -> Result<Permission, Reject> {
    let credential = snapshot.credential(code).ok_or(Reject::Unknown)?;
    if credential
        .expiration
        .is_some_and(|expiration| expiration <= Utc::now())
    {
        return Err(Reject::Expired);
    }
    Ok(Permission {
        code: credential.code.clone(),
        ident: credential.ident.clone(),
        scope: credential.systems.clone(),
        limit: credential.limit,
        expiration: credential.expiration,
    })
}

/// Resolve an ingestion key
///
/// # Errors
///
/// Rejects unknown and disabled keys.
pub fn resolve_api_key(snapshot: &ConfigSnapshot, key: &str) -> Result<Permission, Reject> {
    let api_key = snapshot.api_key(key).ok_or(Reject::Unknown)?;
    if api_key.disabled {
        return Err(Reject::Disabled);
    }
    Ok(Permission {
        code: api_key.key.clone(),
        ident: api_key.ident.clone(),
        scope: api_key.systems.clone(),
        limit: None,
        expiration: None,
    })
}
