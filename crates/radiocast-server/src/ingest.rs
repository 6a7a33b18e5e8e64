//! Ingestion front
//!
//! One validation pipeline for every source of new calls: the HTTP upload
//! endpoint, the directory watcher and downstream pushes. Accepted calls
//! are persisted, handed to the dispatcher and scheduled for forwarding.

use crate::access::{self, Reject};
use crate::state::AppState;
use radiocast_core::types::{
    Call, ConfigSnapshot, SETTING_AUTO_POPULATE_NEW_SYSTEMS, Scope, System, Talkgroup,
};
use radiocast_core::utils::infer_audio_type;
use radiocast_core::Error;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Where a submission came from
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// An external client presenting an ingestion key
    ApiKey(String),

    /// An in-process source (directory watcher); skips key checks
    Trusted,
}

/// Why a submission was refused
#[derive(Debug)]
pub enum IngestError {
    /// Missing, unknown or disabled key (HTTP 401)
    Unauthorized(String),

    /// Key or system policy refuses the call (HTTP 403)
    Forbidden(String),

    /// Malformed submission (HTTP 400)
    Invalid(String),

    /// Store failure (HTTP 500)
    Store(Error),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid call: {msg}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IngestError {}

/// Labels a submission may carry alongside the call itself
#[derive(Debug, Clone, Default)]
pub struct CallExtras {
    /// Label for an auto-populated system
    pub system_label: Option<String>,

    /// Label for an auto-populated talkgroup
    pub talkgroup_label: Option<String>,

    /// Group for an auto-populated talkgroup
    pub talkgroup_group: Option<String>,

    /// Tag for an auto-populated talkgroup
    pub talkgroup_tag: Option<String>,
}

async fn reload(state: &AppState) -> Result<Arc<ConfigSnapshot>, IngestError> {
    state
        .reload_config()
        .await
        .map_err(IngestError::Store)?;
    Ok(state.config_snapshot())
}

/// Validate, persist and dispatch one call submission
///
/// # Errors
///
/// Returns an [`IngestError`] describing the first failed validation step.
pub async fn ingest_call(
    state: &AppState,
    source: IngestSource,
    mut call: Call,
    extras: CallExtras,
) -> Result<Call, IngestError> {
    let mut snapshot = state.config_snapshot();

    let scope = match &source {
        IngestSource::ApiKey(key) => match access::resolve_api_key(&snapshot, key) {
            Ok(permission) => permission.scope,
            Err(Reject::Unknown | Reject::Expired) => {
                return Err(IngestError::Unauthorized("invalid API key".to_string()));
            }
            Err(Reject::Disabled) => {
                return Err(IngestError::Unauthorized("API key is disabled".to_string()));
            }
        },
        IngestSource::Trusted => Scope::All,
    };

    if !scope.allows(call.system, call.talkgroup) {
        return Err(IngestError::Forbidden(format!(
            "system {} talkgroup {} not allowed for this key",
            call.system, call.talkgroup
        )));
    }

    if snapshot.system(call.system).is_none() {
        let permitted = snapshot
            .settings
            .get(SETTING_AUTO_POPULATE_NEW_SYSTEMS)
            .is_none_or(|value| value != "false");
        if scope != Scope::All || !permitted {
            return Err(IngestError::Forbidden(format!(
                "unknown system {}",
                call.system
            )));
        }

        let system = System {
            id: call.system,
            label: extras
                .system_label
                .clone()
                .unwrap_or_else(|| call.system.to_string()),
            led: None,
            order: None,
            auto_populate: true,
            blacklists: HashSet::new(),
            talkgroups: Vec::new(),
            units: Vec::new(),
        };
        state
            .store
            .insert_system(&system)
            .await
            .map_err(IngestError::Store)?;
        info!(system = call.system, "auto-populated system");
        snapshot = reload(state).await?;
    }

    let system = snapshot.system(call.system).ok_or_else(|| {
        IngestError::Store(Error::Other(format!(
            "system {} vanished during ingest",
            call.system
        )))
    })?;

    if system.talkgroup(call.talkgroup).is_none() {
        if system.blacklists.contains(&call.talkgroup) {
            return Err(IngestError::Forbidden(format!(
                "talkgroup {} is blacklisted",
                call.talkgroup
            )));
        }
        if !system.auto_populate {
            return Err(IngestError::Forbidden(format!(
                "unknown talkgroup {}",
                call.talkgroup
            )));
        }

        let label = extras
            .talkgroup_label
            .clone()
            .unwrap_or_else(|| call.talkgroup.to_string());
        let stub = Talkgroup {
            id: call.talkgroup,
            name: label.clone(),
            label,
            group: extras
                .talkgroup_group
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            tag: extras
                .talkgroup_tag
                .clone()
                .unwrap_or_else(|| "Untagged".to_string()),
            frequency: call.frequency,
            led: None,
            order: None,
        };
        match state.store.insert_talkgroup(call.system, &stub).await {
            Ok(()) => {
                info!(
                    system = call.system,
                    talkgroup = call.talkgroup,
                    "auto-populated talkgroup"
                );
                snapshot = reload(state).await?;
            }
            Err(err) => {
                // A concurrent submission may have stubbed it first.
                let fresh = reload(state).await?;
                if fresh
                    .system(call.system)
                    .and_then(|s| s.talkgroup(call.talkgroup))
                    .is_none()
                {
                    return Err(IngestError::Store(err));
                }
                snapshot = fresh;
            }
        }
    }

    if !call.has_audio() {
        return Err(IngestError::Invalid(
            "call carries neither audio nor audioUrl".to_string(),
        ));
    }
    if call.audio.is_some() && call.audio_type.is_none() {
        call.audio_type = call
            .audio_name
            .as_deref()
            .and_then(infer_audio_type)
            .map(str::to_string)
            .or_else(|| Some("application/octet-stream".to_string()));
    }

    let id = state
        .store
        .insert_call(&call)
        .await
        .map_err(IngestError::Store)?;
    call.id = Some(id);

    info!(
        id,
        system = call.system,
        talkgroup = call.talkgroup,
        "call ingested"
    );
    let _ = state
        .store
        .append_log(
            "info",
            &format!(
                "newCall: id={id} system={} talkgroup={}",
                call.system, call.talkgroup
            ),
        )
        .await;

    state.dispatcher.notify_call(&call);
    state.forwarder.schedule(&snapshot, &call);

    Ok(call)
}
