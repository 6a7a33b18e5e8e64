//! Data operations of the store adapter
//!
//! Every statement is built through [`Placeholders`] and the dialect's
//! quoting so user input is always bound, never concatenated.

use crate::models::{
    AccessCredentialRow, ApiKeyRow, CallListRow, CallRow, ConfigRow, DirWatchRow, DownstreamRow,
    SystemRow, TalkgroupRow, UnitRow, from_millis, to_millis,
};
use crate::{Placeholders, Store, db_err};
use chrono::{DateTime, Utc};
use radiocast_core::types::{
    AccessCredential, ApiKey, Call, ConfigSnapshot, DirWatch, Downstream, System, SystemId,
    Talkgroup, TalkgroupId, Unit,
};
use radiocast_core::{CallId, Error, Result};
use sqlx::Row;
use std::collections::HashMap;

/// One per-system restriction of a call search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemFilter {
    /// System to match
    pub system: SystemId,

    /// Talkgroups to match within the system; `None` matches all
    pub talkgroups: Option<Vec<TalkgroupId>>,
}

/// A fully resolved call search
///
/// The playback service resolves group/tag labels and permission scopes
/// into explicit per-system filters before handing the search down here.
#[derive(Debug, Clone, Default)]
pub struct CallSearch {
    /// Half-open window start
    pub date_start: Option<DateTime<Utc>>,

    /// Half-open window end
    pub date_end: Option<DateTime<Utc>>,

    /// Per-system restrictions; `None` is unrestricted, an empty list (or a
    /// list whose every entry has an empty talkgroup set) matches nothing
    pub filters: Option<Vec<SystemFilter>>,

    /// Sort direction
    pub sort_ascending: bool,

    /// Page size
    pub limit: i64,

    /// Page offset
    pub offset: i64,
}

enum BindValue {
    Int(i32),
    BigInt(i64),
}

fn push_filters(
    filters: &[SystemFilter],
    ph: &mut Placeholders,
    binds: &mut Vec<BindValue>,
) -> Option<String> {
    let mut parts = Vec::new();
    for filter in filters {
        match &filter.talkgroups {
            None => {
                parts.push(format!("system = {}", ph.next()));
                binds.push(BindValue::Int(filter.system));
            }
            Some(talkgroups) if talkgroups.is_empty() => {}
            Some(talkgroups) => {
                let system_ph = ph.next();
                let list_ph = ph.list(talkgroups.len());
                parts.push(format!("(system = {system_ph} and talkgroup in ({list_ph}))"));
                binds.push(BindValue::Int(filter.system));
                binds.extend(talkgroups.iter().map(|tg| BindValue::Int(*tg)));
            }
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("({})", parts.join(" or ")))
    }
}

fn bind_values<'q>(
    mut query: sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>>,
    binds: &[BindValue],
) -> sqlx::query::Query<'q, sqlx::Any, sqlx::any::AnyArguments<'q>> {
    for value in binds {
        query = match value {
            BindValue::Int(v) => query.bind(*v),
            BindValue::BigInt(v) => query.bind(*v),
        };
    }
    query
}

fn bind_values_as<'q, T>(
    mut query: sqlx::query::QueryAs<'q, sqlx::Any, T, sqlx::any::AnyArguments<'q>>,
    binds: &[BindValue],
) -> sqlx::query::QueryAs<'q, sqlx::Any, T, sqlx::any::AnyArguments<'q>> {
    for value in binds {
        query = match value {
            BindValue::Int(v) => query.bind(*v),
            BindValue::BigInt(v) => query.bind(*v),
        };
    }
    query
}

const CALL_LIST_COLUMNS: &str = "id, audio_name, audio_type, audio_url, date_time, frequencies, \
                                 frequency, patches, source, sources, system, talkgroup";

impl Store {
    /// Insert a call and return its store-assigned id
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_call(&self, call: &Call) -> Result<CallId> {
        let mut ph = Placeholders::new(self.dialect());
        let mut sql = format!(
            "insert into calls (audio, audio_name, audio_type, audio_url, date_time, \
             frequencies, frequency, patches, source, sources, system, talkgroup) \
             values ({})",
            ph.list(12)
        );
        let returning = self.dialect().numbered_placeholders();
        if returning {
            sql.push_str(" returning id");
        }

        let query = sqlx::query(&sql)
            .bind(call.audio.clone())
            .bind(call.audio_name.clone())
            .bind(call.audio_type.clone())
            .bind(call.audio_url.clone())
            .bind(to_millis(&call.date_time))
            .bind(serde_json::to_string(&call.frequencies)?)
            .bind(call.frequency)
            .bind(serde_json::to_string(&call.patches)?)
            .bind(call.source)
            .bind(serde_json::to_string(&call.sources)?)
            .bind(call.system)
            .bind(call.talkgroup);

        if returning {
            let row = query.fetch_one(self.pool()).await.map_err(db_err)?;
            row.try_get::<i64, _>(0).map_err(db_err)
        } else {
            let result = query.execute(self.pool()).await.map_err(db_err)?;
            result
                .last_insert_id()
                .ok_or_else(|| Error::Database("insert returned no call id".to_string()))
        }
    }

    /// Fetch one call with its audio
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown ids.
    pub async fn get_call(&self, id: CallId) -> Result<Call> {
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "select id, audio, audio_name, audio_type, audio_url, date_time, frequencies, \
             frequency, patches, source, sources, system, talkgroup from calls where id = {}",
            ph.next()
        );

        let row = sqlx::query_as::<_, CallRow>(&sql)
            .bind(id)
            .fetch_one(self.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => Error::NotFound {
                    resource: format!("call {id}"),
                },
                other => db_err(other),
            })?;
        row.into_call()
    }

    /// Run a resolved call search
    ///
    /// Returns the total matching count alongside one page of audio-less
    /// results, sorted by `date_time` in the requested direction.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn search_calls(&self, search: &CallSearch) -> Result<(i64, Vec<Call>)> {
        let mut ph = Placeholders::new(self.dialect());
        let mut binds = Vec::new();
        let mut conditions = Vec::new();

        if let Some(start) = &search.date_start {
            conditions.push(format!("date_time >= {}", ph.next()));
            binds.push(BindValue::BigInt(to_millis(start)));
        }
        if let Some(end) = &search.date_end {
            conditions.push(format!("date_time < {}", ph.next()));
            binds.push(BindValue::BigInt(to_millis(end)));
        }
        if let Some(filters) = &search.filters {
            match push_filters(filters, &mut ph, &mut binds) {
                Some(clause) => conditions.push(clause),
                // Every filter was empty: nothing can match.
                None => return Ok((0, Vec::new())),
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" where {}", conditions.join(" and "))
        };

        let count_sql = format!("select count(*) from calls{where_clause}");
        let count_row = bind_values(sqlx::query(&count_sql), &binds)
            .fetch_one(self.pool())
            .await
            .map_err(db_err)?;
        let count: i64 = count_row.try_get(0).map_err(db_err)?;

        let direction = if search.sort_ascending { "asc" } else { "desc" };
        let page_sql = format!(
            "select {CALL_LIST_COLUMNS} from calls{where_clause} \
             order by date_time {direction}, id {direction} limit {} offset {}",
            ph.next(),
            ph.next()
        );
        let rows = bind_values_as(sqlx::query_as::<_, CallListRow>(&page_sql), &binds)
            .bind(search.limit.max(0))
            .bind(search.offset.max(0))
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            results.push(row.into_call()?);
        }
        Ok((count, results))
    }

    /// Load the full configuration snapshot
    ///
    /// # Errors
    ///
    /// Returns an error if a query or a column parse fails.
    pub async fn load_config(&self) -> Result<ConfigSnapshot> {
        let q = |ident: &str| self.dialect().quote(ident);

        let system_rows = sqlx::query_as::<_, SystemRow>(&format!(
            "select auto_populate, blacklists, id, label, led, {} from systems order by id",
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let talkgroup_rows = sqlx::query_as::<_, TalkgroupRow>(&format!(
            "select frequency, {}, id, label, led, name, {}, system_id, tag \
             from talkgroups order by system_id, id",
            q("group"),
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let unit_rows = sqlx::query_as::<_, UnitRow>(&format!(
            "select id, label, {}, system_id from units order by system_id, id",
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;

        let mut talkgroups_by_system: HashMap<SystemId, Vec<Talkgroup>> = HashMap::new();
        for row in talkgroup_rows {
            talkgroups_by_system
                .entry(row.system_id)
                .or_default()
                .push(row.into());
        }
        let mut units_by_system: HashMap<SystemId, Vec<Unit>> = HashMap::new();
        for row in unit_rows {
            units_by_system
                .entry(row.system_id)
                .or_default()
                .push(row.into());
        }

        let mut systems = Vec::with_capacity(system_rows.len());
        for row in system_rows {
            let talkgroups = talkgroups_by_system.remove(&row.id).unwrap_or_default();
            let units = units_by_system.remove(&row.id).unwrap_or_default();
            systems.push(row.into_system(talkgroups, units)?);
        }

        let groups: Vec<String> =
            sqlx::query_scalar(&format!("select label from {} order by label", q("groups")))
                .fetch_all(self.pool())
                .await
                .map_err(db_err)?;
        let tags: Vec<String> = sqlx::query_scalar("select label from tags order by label")
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        let credential_rows = sqlx::query_as::<_, AccessCredentialRow>(&format!(
            "select code, expiration, ident, {}, {}, systems from access_credentials",
            q("limit"),
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let mut credentials = Vec::with_capacity(credential_rows.len());
        for row in credential_rows {
            credentials.push(row.into_credential()?);
        }

        let api_key_rows = sqlx::query_as::<_, ApiKeyRow>(&format!(
            "select disabled, ident, {}, {}, systems from api_keys",
            q("key"),
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let mut api_keys = Vec::with_capacity(api_key_rows.len());
        for row in api_key_rows {
            api_keys.push(row.into_api_key()?);
        }

        let downstream_rows = sqlx::query_as::<_, DownstreamRow>(&format!(
            "select api_key, disabled, {}, systems, url from downstreams",
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let mut downstreams = Vec::with_capacity(downstream_rows.len());
        for row in downstream_rows {
            downstreams.push(row.into_downstream()?);
        }

        let dir_watch_rows = sqlx::query_as::<_, DirWatchRow>(&format!(
            "select delay, delete_after, directory, disabled, extension, frequency, mask, {}, \
             system_id, talkgroup_id, kind, use_polling from dir_watches",
            q("order")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let dir_watches: Vec<DirWatch> = dir_watch_rows.into_iter().map(Into::into).collect();

        let config_rows = sqlx::query_as::<_, ConfigRow>(&format!(
            "select {}, val from configs",
            q("key")
        ))
        .fetch_all(self.pool())
        .await
        .map_err(db_err)?;
        let settings = config_rows
            .into_iter()
            .map(|row| (row.key, row.val))
            .collect();

        Ok(ConfigSnapshot {
            systems,
            groups,
            tags,
            credentials,
            api_keys,
            downstreams,
            dir_watches,
            settings,
        })
    }

    /// Append a log row
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn append_log(&self, level: &str, message: &str) -> Result<()> {
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into logs (date_time, level, message) values ({})",
            ph.list(3)
        );
        let mut message = message.to_string();
        message.truncate(255);
        sqlx::query(&sql)
            .bind(to_millis(&Utc::now()))
            .bind(level)
            .bind(message)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Read back log rows at or after an instant (newest first)
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn recent_logs(&self, since: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, String, String)>> {
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "select date_time, level, message from logs where date_time >= {} \
             order by date_time desc",
            ph.next()
        );
        let rows = sqlx::query(&sql)
            .bind(to_millis(&since))
            .fetch_all(self.pool())
            .await
            .map_err(db_err)?;

        rows.into_iter()
            .map(|row| {
                Ok((
                    from_millis(row.try_get::<i64, _>(0).map_err(db_err)?),
                    row.try_get::<String, _>(1).map_err(db_err)?,
                    row.try_get::<String, _>(2).map_err(db_err)?,
                ))
            })
            .collect()
    }

    /// Insert a system with its talkgroups and units, transactionally
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails; nothing is written in that case.
    pub async fn insert_system(&self, system: &System) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut blacklists: Vec<TalkgroupId> = system.blacklists.iter().copied().collect();
        blacklists.sort_unstable();

        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into systems (auto_populate, blacklists, id, label, led, {}) values ({})",
            q("order"),
            ph.list(6)
        );
        sqlx::query(&sql)
            .bind(i32::from(system.auto_populate))
            .bind(serde_json::to_string(&blacklists)?)
            .bind(system.id)
            .bind(system.label.clone())
            .bind(system.led.clone())
            .bind(system.order)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        for talkgroup in &system.talkgroups {
            let mut ph = Placeholders::new(self.dialect());
            let sql = format!(
                "insert into talkgroups (frequency, {}, id, label, led, name, {}, system_id, tag) \
                 values ({})",
                q("group"),
                q("order"),
                ph.list(9)
            );
            sqlx::query(&sql)
                .bind(talkgroup.frequency)
                .bind(talkgroup.group.clone())
                .bind(talkgroup.id)
                .bind(talkgroup.label.clone())
                .bind(talkgroup.led.clone())
                .bind(talkgroup.name.clone())
                .bind(talkgroup.order)
                .bind(system.id)
                .bind(talkgroup.tag.clone())
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        for unit in &system.units {
            let mut ph = Placeholders::new(self.dialect());
            let sql = format!(
                "insert into units (id, label, {}, system_id) values ({})",
                q("order"),
                ph.list(4)
            );
            sqlx::query(&sql)
                .bind(unit.id)
                .bind(unit.label.clone())
                .bind(unit.order)
                .bind(system.id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)
    }

    /// Insert one talkgroup under an existing system
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_talkgroup(&self, system: SystemId, talkgroup: &Talkgroup) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into talkgroups (frequency, {}, id, label, led, name, {}, system_id, tag) \
             values ({})",
            q("group"),
            q("order"),
            ph.list(9)
        );
        sqlx::query(&sql)
            .bind(talkgroup.frequency)
            .bind(talkgroup.group.clone())
            .bind(talkgroup.id)
            .bind(talkgroup.label.clone())
            .bind(talkgroup.led.clone())
            .bind(talkgroup.name.clone())
            .bind(talkgroup.order)
            .bind(system)
            .bind(talkgroup.tag.clone())
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a listener credential
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_access_credential(&self, credential: &AccessCredential) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into access_credentials (code, expiration, ident, {}, {}, systems) \
             values ({})",
            q("limit"),
            q("order"),
            ph.list(6)
        );
        sqlx::query(&sql)
            .bind(credential.code.clone())
            .bind(credential.expiration.as_ref().map(to_millis))
            .bind(credential.ident.clone())
            .bind(credential.limit.and_then(|l| i32::try_from(l).ok()))
            .bind(credential.order)
            .bind(serde_json::to_string(&credential.systems)?)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert an ingestion key
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_api_key(&self, api_key: &ApiKey) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into api_keys (disabled, ident, {}, {}, systems) values ({})",
            q("key"),
            q("order"),
            ph.list(5)
        );
        sqlx::query(&sql)
            .bind(i32::from(api_key.disabled))
            .bind(api_key.ident.clone())
            .bind(api_key.key.clone())
            .bind(api_key.order)
            .bind(serde_json::to_string(&api_key.systems)?)
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a downstream peer
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_downstream(&self, downstream: &Downstream) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into downstreams (api_key, disabled, {}, systems, url) values ({})",
            q("order"),
            ph.list(5)
        );
        sqlx::query(&sql)
            .bind(downstream.api_key.clone())
            .bind(i32::from(downstream.disabled))
            .bind(downstream.order)
            .bind(serde_json::to_string(&downstream.systems)?)
            .bind(downstream.url.clone())
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Insert a watched directory
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_dir_watch(&self, watch: &DirWatch) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut ph = Placeholders::new(self.dialect());
        let sql = format!(
            "insert into dir_watches (delay, delete_after, directory, disabled, extension, \
             frequency, mask, {}, system_id, talkgroup_id, kind, use_polling) values ({})",
            q("order"),
            ph.list(12)
        );
        sqlx::query(&sql)
            .bind(i64::try_from(watch.delay).unwrap_or(0))
            .bind(i32::from(watch.delete_after))
            .bind(watch.directory.clone())
            .bind(i32::from(watch.disabled))
            .bind(watch.extension.clone())
            .bind(watch.frequency)
            .bind(watch.mask.clone())
            .bind(watch.order)
            .bind(watch.system_id)
            .bind(watch.talkgroup_id)
            .bind(watch.kind.clone())
            .bind(i32::from(watch.use_polling))
            .execute(self.pool())
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Write a settings row, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns an error if either statement fails; the replacement is
    /// transactional.
    pub async fn set_config(&self, key: &str, val: &str) -> Result<()> {
        let q = |ident: &str| self.dialect().quote(ident);
        let mut tx = self.pool().begin().await.map_err(db_err)?;

        let mut ph = Placeholders::new(self.dialect());
        let delete = format!("delete from configs where {} = {}", q("key"), ph.next());
        sqlx::query(&delete)
            .bind(key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut ph = Placeholders::new(self.dialect());
        let insert = format!(
            "insert into configs ({}, val) values ({})",
            q("key"),
            ph.list(2)
        );
        sqlx::query(&insert)
            .bind(key)
            .bind(val)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }
}
