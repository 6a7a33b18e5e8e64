//! Core data types for the Radiocast server

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use validator::Validate;

/// System identifier type
pub type SystemId = i32;

/// Talkgroup identifier type
pub type TalkgroupId = i32;

/// Radio unit identifier type
pub type UnitId = i32;

/// Call identifier type (monotonic, store-assigned)
pub type CallId = i64;

/// Settings key enabling the periodic listener-count broadcast
pub const SETTING_SHOW_LISTENERS_COUNT: &str = "showListenersCount";

/// Settings key allowing unknown systems to be created on ingest
pub const SETTING_AUTO_POPULATE_NEW_SYSTEMS: &str = "autoPopulateNewSystems";

/// Serde adapter encoding optional audio bytes as a base64 string on the wire
pub mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize bytes as base64
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying serializer fails.
    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserialize base64 into bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not valid base64.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        value
            .map(|s| STANDARD.decode(s))
            .transpose()
            .map_err(serde::de::Error::custom)
    }
}

/// One entry of a call's source unit timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSource {
    /// Offset into the call audio, in seconds
    pub pos: f64,

    /// Transmitting unit id
    pub src: UnitId,
}

/// One entry of a call's frequency timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrequency {
    /// Offset into the call audio, in seconds
    pub pos: f64,

    /// Frequency in Hz
    pub freq: i64,

    /// Segment length in seconds
    #[serde(default)]
    pub len: f64,

    /// Decoder error count for the segment
    #[serde(default)]
    pub error_count: i32,

    /// Decoder spike count for the segment
    #[serde(default)]
    pub spike_count: i32,
}

/// A single recorded radio transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    /// Store-assigned identifier; `None` until persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CallId>,

    /// When the call was captured
    pub date_time: DateTime<Utc>,

    /// System the call belongs to
    pub system: SystemId,

    /// Talkgroup the call was heard on
    pub talkgroup: TalkgroupId,

    /// Primary frequency in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,

    /// Primary source unit id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<UnitId>,

    /// Ordered source unit timeline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<CallSource>,

    /// Ordered frequency timeline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frequencies: Vec<CallFrequency>,

    /// Talkgroups patched onto this one at capture time
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patches: Vec<TalkgroupId>,

    /// Audio payload; absent when the call is URL-backed
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Option::is_none")]
    pub audio: Option<Vec<u8>>,

    /// Audio file name hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_name: Option<String>,

    /// Audio MIME type hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_type: Option<String>,

    /// Offsite audio location; absent when the audio blob is stored locally
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
}

impl Default for Call {
    fn default() -> Self {
        Self {
            id: None,
            date_time: Utc::now(),
            system: 0,
            talkgroup: 0,
            frequency: None,
            source: None,
            sources: Vec::new(),
            frequencies: Vec::new(),
            patches: Vec::new(),
            audio: None,
            audio_name: None,
            audio_type: None,
            audio_url: None,
        }
    }
}

impl Call {
    /// Whether the call carries a resolvable audio reference (blob or URL)
    #[must_use]
    pub fn has_audio(&self) -> bool {
        self.audio.as_ref().is_some_and(|a| !a.is_empty())
            || self.audio_url.as_ref().is_some_and(|u| !u.is_empty())
    }

    /// Copy of this call without the audio blob, for list results
    #[must_use]
    pub fn without_audio(&self) -> Self {
        let mut call = self.clone();
        call.audio = None;
        call
    }
}

/// A logical channel within a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Talkgroup {
    /// Talkgroup id, unique within its system
    pub id: TalkgroupId,

    /// Short display label
    pub label: String,

    /// Full name
    pub name: String,

    /// Group label (global registry, stored verbatim)
    pub group: String,

    /// Tag label (global registry, stored verbatim)
    pub tag: String,

    /// Nominal frequency in Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,

    /// LED color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led: Option<String>,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

impl Talkgroup {
    /// Stub created when a system auto-populates an unknown talkgroup
    #[must_use]
    pub fn stub(id: TalkgroupId) -> Self {
        Self {
            id,
            label: id.to_string(),
            name: id.to_string(),
            group: "Unknown".to_string(),
            tag: "Untagged".to_string(),
            frequency: None,
            led: None,
            order: None,
        }
    }
}

/// A radio source identity within a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Unit id, unique within its system
    pub id: UnitId,

    /// Display label
    pub label: String,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

/// A radio trunking or conventional network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct System {
    /// Stable system id
    pub id: SystemId,

    /// Display label
    pub label: String,

    /// LED color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led: Option<String>,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Whether unknown talkgroups are stubbed on ingest
    #[serde(default)]
    pub auto_populate: bool,

    /// Talkgroup ids rejected on ingest
    #[serde(default, skip_serializing_if = "HashSet::is_empty")]
    pub blacklists: HashSet<TalkgroupId>,

    /// Talkgroups under this system
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub talkgroups: Vec<Talkgroup>,

    /// Units under this system
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<Unit>,
}

impl System {
    /// Find a talkgroup by id
    #[must_use]
    pub fn talkgroup(&self, id: TalkgroupId) -> Option<&Talkgroup> {
        self.talkgroups.iter().find(|tg| tg.id == id)
    }
}

/// Per-system part of an allow-list: every talkgroup, or an explicit set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TalkgroupScope {
    /// All talkgroups of the system
    All,

    /// Only the listed talkgroups
    List(HashSet<TalkgroupId>),
}

impl TalkgroupScope {
    /// Whether the scope admits the given talkgroup
    #[must_use]
    pub fn allows(&self, talkgroup: TalkgroupId) -> bool {
        match self {
            Self::All => true,
            Self::List(set) => set.contains(&talkgroup),
        }
    }
}

/// A credential or key allow-list over systems and talkgroups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The sentinel `"*"`: every system and talkgroup
    All,

    /// An explicit per-system allow-list
    Systems(HashMap<SystemId, TalkgroupScope>),
}

impl Default for Scope {
    fn default() -> Self {
        Self::All
    }
}

impl Scope {
    /// Whether the scope admits the given system/talkgroup pair
    #[must_use]
    pub fn allows(&self, system: SystemId, talkgroup: TalkgroupId) -> bool {
        match self {
            Self::All => true,
            Self::Systems(map) => map.get(&system).is_some_and(|tgs| tgs.allows(talkgroup)),
        }
    }

    /// Whether the scope admits any talkgroup of the given system
    #[must_use]
    pub fn allows_system(&self, system: SystemId) -> bool {
        match self {
            Self::All => true,
            Self::Systems(map) => map.contains_key(&system),
        }
    }

    /// Per-system talkgroup restriction; `None` when the system is not allowed
    #[must_use]
    pub fn talkgroup_scope(&self, system: SystemId) -> Option<&TalkgroupScope> {
        match self {
            Self::All => Some(&TalkgroupScope::All),
            Self::Systems(map) => map.get(&system),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TalkgroupScopeRepr {
    Star(String),
    List(Vec<TalkgroupId>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeRepr {
    Star(String),
    Map(HashMap<String, TalkgroupScopeRepr>),
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::All => serializer.serialize_str("*"),
            Self::Systems(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (system, tgs) in map {
                    match tgs {
                        TalkgroupScope::All => out.serialize_entry(&system.to_string(), "*")?,
                        TalkgroupScope::List(set) => {
                            let mut list: Vec<TalkgroupId> = set.iter().copied().collect();
                            list.sort_unstable();
                            out.serialize_entry(&system.to_string(), &list)?;
                        }
                    }
                }
                out.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match ScopeRepr::deserialize(deserializer)? {
            ScopeRepr::Star(s) if s == "*" => Ok(Self::All),
            ScopeRepr::Star(s) => Err(D::Error::custom(format!(
                "expected \"*\" or a system map, got \"{s}\""
            ))),
            ScopeRepr::Map(map) => {
                let mut systems = HashMap::with_capacity(map.len());
                for (key, value) in map {
                    let system: SystemId = key
                        .parse()
                        .map_err(|_| D::Error::custom(format!("invalid system id \"{key}\"")))?;
                    let tgs = match value {
                        TalkgroupScopeRepr::Star(s) if s == "*" => TalkgroupScope::All,
                        TalkgroupScopeRepr::Star(s) => {
                            return Err(D::Error::custom(format!(
                                "expected \"*\" or a talkgroup list, got \"{s}\""
                            )));
                        }
                        TalkgroupScopeRepr::List(list) => {
                            TalkgroupScope::List(list.into_iter().collect())
                        }
                    };
                    systems.insert(system, tgs);
                }
                Ok(Self::Systems(systems))
            }
        }
    }
}

/// A listener credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCredential {
    /// Opaque secret presented by listeners
    pub code: String,

    /// Human-readable identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,

    /// When the credential stops working
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,

    /// Maximum concurrent sessions for this credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Allowed systems and talkgroups
    #[serde(default)]
    pub systems: Scope,
}

/// An ingestion client key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    /// Opaque secret presented by ingestion clients
    pub key: String,

    /// Human-readable identity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ident: Option<String>,

    /// Whether the key is disabled
    #[serde(default)]
    pub disabled: bool,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Allowed systems and talkgroups
    #[serde(default)]
    pub systems: Scope,
}

/// A peer server that receives forwarded copies of accepted calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Downstream {
    /// Peer upload URL
    pub url: String,

    /// Key presented to the peer
    pub api_key: String,

    /// Whether forwarding to this peer is disabled
    #[serde(default)]
    pub disabled: bool,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Calls forwarded to this peer
    #[serde(default)]
    pub systems: Scope,
}

/// A watched ingest directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirWatch {
    /// Directory to watch
    pub directory: String,

    /// Only pick up files with this extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    /// Filename mask mapping name fragments to call metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,

    /// System assigned to picked-up calls when the mask does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_id: Option<SystemId>,

    /// Talkgroup assigned when the mask does not supply one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub talkgroup_id: Option<TalkgroupId>,

    /// Frequency assigned to picked-up calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<i64>,

    /// Milliseconds to wait after the last write before ingesting
    #[serde(default)]
    pub delay: u64,

    /// Remove the file after a successful ingest
    #[serde(default)]
    pub delete_after: bool,

    /// Whether this watch is disabled
    #[serde(default)]
    pub disabled: bool,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Watcher flavor hint
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    /// Poll the directory instead of relying on native events
    #[serde(default)]
    pub use_polling: bool,
}

/// A session's per-talkgroup on/off subscription map
///
/// Missing entries are inactive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LivefeedMap(pub HashMap<SystemId, HashMap<TalkgroupId, bool>>);

impl LivefeedMap {
    /// Whether the pair is marked active
    #[must_use]
    pub fn is_active(&self, system: SystemId, talkgroup: TalkgroupId) -> bool {
        self.0
            .get(&system)
            .and_then(|tgs| tgs.get(&talkgroup))
            .copied()
            .unwrap_or(false)
    }

    /// Drop every entry the scope does not admit
    pub fn retain_allowed(&mut self, scope: &Scope) {
        for (system, tgs) in &mut self.0 {
            tgs.retain(|tg, _| scope.allows(*system, *tg));
        }
        self.0.retain(|_, tgs| !tgs.is_empty());
    }
}

/// Options of a historical call search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Exact-day window (local midnight to next midnight)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,

    /// Half-open range start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_start: Option<DateTime<Utc>>,

    /// Half-open range end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_end: Option<DateTime<Utc>>,

    /// Single system filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemId>,

    /// Single talkgroup filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub talkgroup: Option<TalkgroupId>,

    /// Group label filter, expanded to the talkgroups carrying it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Tag label filter, expanded to the talkgroups carrying it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,

    /// +1 ascending, -1 descending (default)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = -1, max = 1))]
    pub sort: Option<i32>,

    /// Page size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0))]
    pub limit: Option<i64>,

    /// Page offset into the full filtered set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    /// Total matching set size, independent of limit/offset
    pub count: i64,

    /// Echo of the options that produced this page
    pub options: SearchOptions,

    /// Result rows, audio stripped
    pub results: Vec<Call>,
}

/// A system as exposed to listeners, with internals stripped
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSystem {
    /// Stable system id
    pub id: SystemId,

    /// Display label
    pub label: String,

    /// LED color hint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led: Option<String>,

    /// Display order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,

    /// Talkgroups visible to the listener
    pub talkgroups: Vec<Talkgroup>,
}

/// The config payload pushed to an authenticated listener
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicConfig {
    /// Systems filtered to the listener's permitted set
    pub systems: Vec<PublicSystem>,

    /// Group labels referenced by the visible talkgroups
    pub groups: Vec<String>,

    /// Tag labels referenced by the visible talkgroups
    pub tags: Vec<String>,

    /// Server-side presentation settings
    pub settings: HashMap<String, String>,
}

/// Everything the store knows about the site, loaded as one immutable snapshot
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    /// All systems with their talkgroups and units
    pub systems: Vec<System>,

    /// Global group label registry
    pub groups: Vec<String>,

    /// Global tag label registry
    pub tags: Vec<String>,

    /// Listener credentials
    pub credentials: Vec<AccessCredential>,

    /// Ingestion keys
    pub api_keys: Vec<ApiKey>,

    /// Forwarding peers
    pub downstreams: Vec<Downstream>,

    /// Watched ingest directories
    pub dir_watches: Vec<DirWatch>,

    /// Key/val settings
    pub settings: HashMap<String, String>,
}

impl ConfigSnapshot {
    /// Find a system by id
    #[must_use]
    pub fn system(&self, id: SystemId) -> Option<&System> {
        self.systems.iter().find(|s| s.id == id)
    }

    /// Find a listener credential by code
    #[must_use]
    pub fn credential(&self, code: &str) -> Option<&AccessCredential> {
        self.credentials.iter().find(|c| c.code == code)
    }

    /// Find an ingestion key
    #[must_use]
    pub fn api_key(&self, key: &str) -> Option<&ApiKey> {
        self.api_keys.iter().find(|k| k.key == key)
    }

    /// Whether a boolean settings row is enabled
    #[must_use]
    pub fn setting_enabled(&self, key: &str) -> bool {
        self.settings
            .get(key)
            .is_some_and(|v| v == "true" || v == "1")
    }

    /// Build the public config snapshot for a listener scope
    #[must_use]
    pub fn public_config(&self, scope: &Scope) -> PublicConfig {
        let mut groups = HashSet::new();
        let mut tags = HashSet::new();

        let systems: Vec<PublicSystem> = self
            .systems
            .iter()
            .filter(|system| scope.allows_system(system.id))
            .map(|system| {
                let talkgroups: Vec<Talkgroup> = system
                    .talkgroups
                    .iter()
                    .filter(|tg| scope.allows(system.id, tg.id))
                    .cloned()
                    .collect();
                for tg in &talkgroups {
                    groups.insert(tg.group.clone());
                    tags.insert(tg.tag.clone());
                }
                PublicSystem {
                    id: system.id,
                    label: system.label.clone(),
                    led: system.led.clone(),
                    order: system.order,
                    talkgroups,
                }
            })
            .collect();

        let mut groups: Vec<String> = groups.into_iter().collect();
        groups.sort();
        let mut tags: Vec<String> = tags.into_iter().collect();
        tags.sort();

        PublicConfig {
            systems,
            groups,
            tags,
            settings: self.settings.clone(),
        }
    }
}
