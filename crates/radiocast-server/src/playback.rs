//! Playback/query service
//!
//! Resolves a session's search options against its permission scope and the
//! current configuration snapshot, then runs the bounded search against the
//! store. Group and tag labels expand to per-system talkgroup sets here;
//! the store only ever sees explicit filters.

use chrono::{Duration, NaiveTime};
use radiocast_core::types::{
    ConfigSnapshot, Scope, SearchOptions, SearchResults, TalkgroupId, TalkgroupScope,
};
use radiocast_store::{CallSearch, Store, SystemFilter};
use std::collections::HashSet;
use tracing::error;
use validator::Validate;

fn intersect(
    current: Option<HashSet<TalkgroupId>>,
    next: HashSet<TalkgroupId>,
) -> HashSet<TalkgroupId> {
    match current {
        None => next,
        Some(current) => current.intersection(&next).copied().collect(),
    }
}

/// Resolve options and scope into an explicit store search
///
/// Returns `None` when nothing can match: invalid options, a system outside
/// the scope, or label/talkgroup filters that leave every system empty.
#[must_use]
pub fn resolve_search(
    snapshot: &ConfigSnapshot,
    options: &SearchOptions,
    scope: &Scope,
    max_results: i64,
) -> Option<CallSearch> {
    if options.validate().is_err() {
        return None;
    }

    let (date_start, date_end) = if let Some(date) = options.date {
        let day = date.date_naive().and_time(NaiveTime::MIN).and_utc();
        (Some(day), Some(day + Duration::days(1)))
    } else {
        (options.date_start, options.date_end)
    };

    let unrestricted = matches!(scope, Scope::All)
        && options.system.is_none()
        && options.talkgroup.is_none()
        && options.group.is_none()
        && options.tag.is_none();

    let filters = if unrestricted {
        None
    } else {
        let mut filters = Vec::new();
        for system in &snapshot.systems {
            if options.system.is_some_and(|wanted| wanted != system.id) {
                continue;
            }
            let Some(allowed) = scope.talkgroup_scope(system.id) else {
                continue;
            };

            let mut set: Option<HashSet<TalkgroupId>> = match allowed {
                TalkgroupScope::All => None,
                TalkgroupScope::List(list) => Some(list.clone()),
            };
            if let Some(talkgroup) = options.talkgroup {
                set = Some(intersect(set, HashSet::from([talkgroup])));
            }
            if let Some(group) = &options.group {
                let members = system
                    .talkgroups
                    .iter()
                    .filter(|tg| &tg.group == group)
                    .map(|tg| tg.id)
                    .collect();
                set = Some(intersect(set, members));
            }
            if let Some(tag) = &options.tag {
                let members = system
                    .talkgroups
                    .iter()
                    .filter(|tg| &tg.tag == tag)
                    .map(|tg| tg.id)
                    .collect();
                set = Some(intersect(set, members));
            }

            match set {
                None => filters.push(SystemFilter {
                    system: system.id,
                    talkgroups: None,
                }),
                Some(set) if set.is_empty() => {}
                Some(set) => {
                    let mut talkgroups: Vec<TalkgroupId> = set.into_iter().collect();
                    talkgroups.sort_unstable();
                    filters.push(SystemFilter {
                        system: system.id,
                        talkgroups: Some(talkgroups),
                    });
                }
            }
        }
        if filters.is_empty() {
            return None;
        }
        Some(filters)
    };

    Some(CallSearch {
        date_start,
        date_end,
        filters,
        sort_ascending: options.sort == Some(1),
        limit: options.limit.unwrap_or(max_results).clamp(0, max_results),
        offset: options.offset.unwrap_or(0).max(0),
    })
}

/// Run a permission-restricted search
///
/// Store failures are logged and surface as an empty result; the session
/// stays up.
pub async fn search_calls(
    store: &Store,
    snapshot: &ConfigSnapshot,
    options: SearchOptions,
    scope: &Scope,
    max_results: i64,
) -> SearchResults {
    let Some(search) = resolve_search(snapshot, &options, scope, max_results) else {
        return SearchResults {
            count: 0,
            options,
            results: Vec::new(),
        };
    };

    match store.search_calls(&search).await {
        Ok((count, results)) => SearchResults {
            count,
            options,
            results,
        },
        Err(err) => {
            error!(error = %err, "call search failed");
            let _ = store.append_log("error", &format!("search failed: {err}")).await;
            SearchResults {
                count: 0,
                options,
                results: Vec::new(),
            }
        }
    }
}
