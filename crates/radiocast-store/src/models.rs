//! Row models for the store adapter
//!
//! These structs mirror the persisted schema and hide its dialect-neutral
//! encodings: instants are epoch milliseconds in BIGINT columns, booleans
//! are SMALLINT 0/1, and list/scope values are JSON text.

use chrono::{DateTime, Utc};
use radiocast_core::types::{
    AccessCredential, ApiKey, Call, CallFrequency, CallSource, DirWatch, Downstream, Scope, System,
    Talkgroup, Unit,
};
use radiocast_core::{Error, Result};
use sqlx::FromRow;
use std::collections::HashSet;

/// Encode an instant as epoch milliseconds
#[must_use]
pub fn to_millis(instant: &DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

/// Decode epoch milliseconds into an instant
#[must_use]
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

fn parse_json<T: serde::de::DeserializeOwned>(text: &str, field: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Database(format!("bad {field} column: {e}")))
}

/// Full call row, audio included
#[derive(Debug, Clone, FromRow)]
pub struct CallRow {
    /// Store-assigned id
    pub id: i64,
    /// Audio payload
    pub audio: Option<Vec<u8>>,
    /// Audio file name hint
    pub audio_name: Option<String>,
    /// Audio MIME hint
    pub audio_type: Option<String>,
    /// Offsite audio location
    pub audio_url: Option<String>,
    /// Capture instant, epoch milliseconds
    pub date_time: i64,
    /// Frequency timeline, JSON
    pub frequencies: String,
    /// Primary frequency
    pub frequency: Option<i64>,
    /// Patched talkgroups, JSON
    pub patches: String,
    /// Primary source unit
    pub source: Option<i32>,
    /// Source timeline, JSON
    pub sources: String,
    /// System id
    pub system: i32,
    /// Talkgroup id
    pub talkgroup: i32,
}

impl CallRow {
    /// Convert into the domain call
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON column fails to parse.
    pub fn into_call(self) -> Result<Call> {
        Ok(Call {
            id: Some(self.id),
            date_time: from_millis(self.date_time),
            system: self.system,
            talkgroup: self.talkgroup,
            frequency: self.frequency,
            source: self.source,
            sources: parse_json::<Vec<CallSource>>(&self.sources, "sources")?,
            frequencies: parse_json::<Vec<CallFrequency>>(&self.frequencies, "frequencies")?,
            patches: parse_json::<Vec<i32>>(&self.patches, "patches")?,
            audio: self.audio,
            audio_name: self.audio_name,
            audio_type: self.audio_type,
            audio_url: self.audio_url,
        })
    }
}

/// Call row as returned by searches, audio omitted
#[derive(Debug, Clone, FromRow)]
pub struct CallListRow {
    /// Store-assigned id
    pub id: i64,
    /// Audio file name hint
    pub audio_name: Option<String>,
    /// Audio MIME hint
    pub audio_type: Option<String>,
    /// Offsite audio location
    pub audio_url: Option<String>,
    /// Capture instant, epoch milliseconds
    pub date_time: i64,
    /// Frequency timeline, JSON
    pub frequencies: String,
    /// Primary frequency
    pub frequency: Option<i64>,
    /// Patched talkgroups, JSON
    pub patches: String,
    /// Primary source unit
    pub source: Option<i32>,
    /// Source timeline, JSON
    pub sources: String,
    /// System id
    pub system: i32,
    /// Talkgroup id
    pub talkgroup: i32,
}

impl CallListRow {
    /// Convert into the domain call (no audio)
    ///
    /// # Errors
    ///
    /// Returns an error if a JSON column fails to parse.
    pub fn into_call(self) -> Result<Call> {
        Ok(Call {
            id: Some(self.id),
            date_time: from_millis(self.date_time),
            system: self.system,
            talkgroup: self.talkgroup,
            frequency: self.frequency,
            source: self.source,
            sources: parse_json::<Vec<CallSource>>(&self.sources, "sources")?,
            frequencies: parse_json::<Vec<CallFrequency>>(&self.frequencies, "frequencies")?,
            patches: parse_json::<Vec<i32>>(&self.patches, "patches")?,
            audio: None,
            audio_name: self.audio_name,
            audio_type: self.audio_type,
            audio_url: self.audio_url,
        })
    }
}

/// System row
#[derive(Debug, Clone, FromRow)]
pub struct SystemRow {
    /// Auto-populate flag, 0/1
    pub auto_populate: i32,
    /// Blacklisted talkgroups, JSON array
    pub blacklists: String,
    /// Stable system id
    pub id: i32,
    /// Display label
    pub label: String,
    /// LED color hint
    pub led: Option<String>,
    /// Display order
    pub order: Option<i32>,
}

impl SystemRow {
    /// Convert into the domain system, attaching its talkgroups and units
    ///
    /// # Errors
    ///
    /// Returns an error if the blacklists column fails to parse.
    pub fn into_system(self, talkgroups: Vec<Talkgroup>, units: Vec<Unit>) -> Result<System> {
        let blacklists: HashSet<i32> = parse_json::<Vec<i32>>(&self.blacklists, "blacklists")?
            .into_iter()
            .collect();
        Ok(System {
            id: self.id,
            label: self.label,
            led: self.led,
            order: self.order,
            auto_populate: self.auto_populate != 0,
            blacklists,
            talkgroups,
            units,
        })
    }
}

/// Talkgroup row
#[derive(Debug, Clone, FromRow)]
pub struct TalkgroupRow {
    /// Nominal frequency
    pub frequency: Option<i64>,
    /// Group label
    pub group: String,
    /// Talkgroup id
    pub id: i32,
    /// Display label
    pub label: String,
    /// LED color hint
    pub led: Option<String>,
    /// Full name
    pub name: String,
    /// Display order
    pub order: Option<i32>,
    /// Owning system id
    pub system_id: i32,
    /// Tag label
    pub tag: String,
}

impl From<TalkgroupRow> for Talkgroup {
    fn from(row: TalkgroupRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            name: row.name,
            group: row.group,
            tag: row.tag,
            frequency: row.frequency,
            led: row.led,
            order: row.order,
        }
    }
}

/// Unit row
#[derive(Debug, Clone, FromRow)]
pub struct UnitRow {
    /// Unit id
    pub id: i32,
    /// Display label
    pub label: String,
    /// Display order
    pub order: Option<i32>,
    /// Owning system id
    pub system_id: i32,
}

impl From<UnitRow> for Unit {
    fn from(row: UnitRow) -> Self {
        Self {
            id: row.id,
            label: row.label,
            order: row.order,
        }
    }
}

/// Listener credential row
#[derive(Debug, Clone, FromRow)]
pub struct AccessCredentialRow {
    /// Credential code
    pub code: String,
    /// Expiration instant, epoch milliseconds
    pub expiration: Option<i64>,
    /// Human-readable identity
    pub ident: Option<String>,
    /// Concurrent session cap
    pub limit: Option<i32>,
    /// Display order
    pub order: Option<i32>,
    /// Allow-list, JSON
    pub systems: String,
}

impl AccessCredentialRow {
    /// Convert into the domain credential
    ///
    /// # Errors
    ///
    /// Returns an error if the systems column fails to parse.
    pub fn into_credential(self) -> Result<AccessCredential> {
        Ok(AccessCredential {
            code: self.code,
            ident: self.ident,
            expiration: self.expiration.map(from_millis),
            limit: self.limit.and_then(|l| u32::try_from(l).ok()),
            order: self.order,
            systems: parse_json::<Scope>(&self.systems, "systems")?,
        })
    }
}

/// Ingestion key row
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    /// Disabled flag, 0/1
    pub disabled: i32,
    /// Human-readable identity
    pub ident: Option<String>,
    /// Key secret
    pub key: String,
    /// Display order
    pub order: Option<i32>,
    /// Allow-list, JSON
    pub systems: String,
}

impl ApiKeyRow {
    /// Convert into the domain key
    ///
    /// # Errors
    ///
    /// Returns an error if the systems column fails to parse.
    pub fn into_api_key(self) -> Result<ApiKey> {
        Ok(ApiKey {
            key: self.key,
            ident: self.ident,
            disabled: self.disabled != 0,
            order: self.order,
            systems: parse_json::<Scope>(&self.systems, "systems")?,
        })
    }
}

/// Downstream peer row
#[derive(Debug, Clone, FromRow)]
pub struct DownstreamRow {
    /// Key presented to the peer
    pub api_key: String,
    /// Disabled flag, 0/1
    pub disabled: i32,
    /// Display order
    pub order: Option<i32>,
    /// Allow-list, JSON
    pub systems: String,
    /// Peer upload URL
    pub url: String,
}

impl DownstreamRow {
    /// Convert into the domain downstream
    ///
    /// # Errors
    ///
    /// Returns an error if the systems column fails to parse.
    pub fn into_downstream(self) -> Result<Downstream> {
        Ok(Downstream {
            url: self.url,
            api_key: self.api_key,
            disabled: self.disabled != 0,
            order: self.order,
            systems: parse_json::<Scope>(&self.systems, "systems")?,
        })
    }
}

/// Watched directory row
#[derive(Debug, Clone, FromRow)]
pub struct DirWatchRow {
    /// Post-write settle delay, milliseconds
    pub delay: i64,
    /// Delete-after-ingest flag, 0/1
    pub delete_after: i32,
    /// Watched directory
    pub directory: String,
    /// Disabled flag, 0/1
    pub disabled: i32,
    /// Extension filter
    pub extension: Option<String>,
    /// Assigned frequency
    pub frequency: Option<i64>,
    /// Filename mask
    pub mask: Option<String>,
    /// Display order
    pub order: Option<i32>,
    /// Assigned system
    pub system_id: Option<i32>,
    /// Assigned talkgroup
    pub talkgroup_id: Option<i32>,
    /// Watcher flavor hint
    pub kind: Option<String>,
    /// Polling flag, 0/1
    pub use_polling: i32,
}

impl From<DirWatchRow> for DirWatch {
    fn from(row: DirWatchRow) -> Self {
        Self {
            directory: row.directory,
            extension: row.extension,
            mask: row.mask,
            system_id: row.system_id,
            talkgroup_id: row.talkgroup_id,
            frequency: row.frequency,
            delay: u64::try_from(row.delay).unwrap_or(0),
            delete_after: row.delete_after != 0,
            disabled: row.disabled != 0,
            order: row.order,
            kind: row.kind,
            use_polling: row.use_polling != 0,
        }
    }
}

/// Settings row
#[derive(Debug, Clone, FromRow)]
pub struct ConfigRow {
    /// Settings key
    pub key: String,
    /// Settings value
    pub val: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_millis_roundtrip() {
        let instant = from_millis(1_714_551_000_123);
        assert_eq!(to_millis(&instant), 1_714_551_000_123);
    }

    #[test]
    fn test_call_row_into_call() {
        let row = CallRow {
            id: 9,
            audio: Some(vec![1, 2]),
            audio_name: Some("a.mp3".to_string()),
            audio_type: Some("audio/mpeg".to_string()),
            audio_url: None,
            date_time: 1_714_551_000_000,
            frequencies: r#"[{"pos":0.0,"freq":857237500,"len":1.5,"errorCount":0,"spikeCount":1}]"#
                .to_string(),
            frequency: Some(857_237_500),
            patches: "[1002]".to_string(),
            source: Some(4007),
            sources: r#"[{"pos":0.0,"src":4007}]"#.to_string(),
            system: 1,
            talkgroup: 1001,
        };

        let call = row.into_call().unwrap();
        assert_eq!(call.id, Some(9));
        assert_eq!(call.patches, vec![1002]);
        assert_eq!(call.sources.len(), 1);
        assert_eq!(call.frequencies[0].spike_count, 1);
        assert_eq!(to_millis(&call.date_time), 1_714_551_000_000);
    }

    #[test]
    fn test_call_row_rejects_bad_json() {
        let row = CallRow {
            id: 1,
            audio: None,
            audio_name: None,
            audio_type: None,
            audio_url: Some("https://example.net/a.mp3".to_string()),
            date_time: 0,
            frequencies: "[]".to_string(),
            frequency: None,
            patches: "not json".to_string(),
            source: None,
            sources: "[]".to_string(),
            system: 1,
            talkgroup: 1,
        };
        assert!(row.into_call().is_err());
    }

    #[test]
    fn test_system_row_into_system() {
        let row = SystemRow {
            auto_populate: 1,
            blacklists: "[666]".to_string(),
            id: 1,
            label: "A".to_string(),
            led: Some("green".to_string()),
            order: Some(1),
        };
        let system = row.into_system(vec![Talkgroup::stub(1001)], Vec::new()).unwrap();
        assert!(system.auto_populate);
        assert!(system.blacklists.contains(&666));
        assert_eq!(system.talkgroups.len(), 1);
    }

    #[test]
    fn test_credential_row_scope() {
        let row = AccessCredentialRow {
            code: "1234".to_string(),
            expiration: None,
            ident: None,
            limit: Some(4),
            order: None,
            systems: r#"{"1":[1001]}"#.to_string(),
        };
        let credential = row.into_credential().unwrap();
        assert_eq!(credential.limit, Some(4));
        assert!(credential.systems.allows(1, 1001));
        assert!(!credential.systems.allows(1, 1002));
    }

    #[test]
    fn test_api_key_row_star_scope() {
        let row = ApiKeyRow {
            disabled: 0,
            ident: None,
            key: "k".to_string(),
            order: None,
            systems: "\"*\"".to_string(),
        };
        let key = row.into_api_key().unwrap();
        assert!(!key.disabled);
        assert_eq!(key.systems, Scope::All);
    }
}
