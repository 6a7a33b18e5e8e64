//! Store adapter integration tests against a sqlite database

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use radiocast_core::config::DatabaseConfig;
use radiocast_core::types::{
    AccessCredential, ApiKey, Call, CallFrequency, CallSource, DirWatch, Downstream, Scope, System,
    Talkgroup, Unit,
};
use radiocast_store::{CallSearch, Store, SystemFilter};
use std::collections::HashSet;
use tempfile::TempDir;

async fn test_store() -> (Store, TempDir) {
    let dir = TempDir::new().expect("tempdir");
    let config = DatabaseConfig {
        dialect: "sqlite".to_string(),
        file: dir
            .path()
            .join("radiocast-test.db")
            .to_string_lossy()
            .into_owned(),
        ..DatabaseConfig::default()
    };
    let store = Store::connect(&config).await.expect("connect");
    store.bootstrap().await.expect("bootstrap");
    (store, dir)
}

fn sample_system() -> System {
    System {
        id: 1,
        label: "A".to_string(),
        led: Some("green".to_string()),
        order: Some(1),
        auto_populate: true,
        blacklists: HashSet::from([666]),
        talkgroups: vec![
            Talkgroup {
                id: 1001,
                label: "DISP".to_string(),
                name: "Dispatch".to_string(),
                group: "Law".to_string(),
                tag: "Dispatch".to_string(),
                frequency: Some(857_237_500),
                led: None,
                order: Some(1),
            },
            Talkgroup {
                id: 1002,
                label: "TAC".to_string(),
                name: "Tactical".to_string(),
                group: "Law".to_string(),
                tag: "Tactical".to_string(),
                frequency: None,
                led: Some("red".to_string()),
                order: Some(2),
            },
        ],
        units: vec![Unit {
            id: 4007,
            label: "Engine 7".to_string(),
            order: Some(1),
        }],
    }
}

fn call_at(instant: DateTime<Utc>, system: i32, talkgroup: i32) -> Call {
    Call {
        date_time: instant,
        system,
        talkgroup,
        audio: Some(vec![0xffu8; 16]),
        audio_name: Some("call.mp3".to_string()),
        audio_type: Some("audio/mpeg".to_string()),
        ..Call::default()
    }
}

#[tokio::test]
async fn test_bootstrap_is_idempotent_and_seeds_defaults() {
    let (store, _dir) = test_store().await;
    store.bootstrap().await.expect("second bootstrap");

    let snapshot = store.load_config().await.expect("load_config");
    assert!(snapshot.groups.contains(&"Unknown".to_string()));
    assert!(snapshot.tags.contains(&"Untagged".to_string()));
    assert!(snapshot.systems.is_empty());
    assert!(snapshot.credentials.is_empty());
}

#[tokio::test]
async fn test_insert_system_roundtrip() {
    let (store, _dir) = test_store().await;
    let system = sample_system();

    store.insert_system(&system).await.expect("insert_system");
    let snapshot = store.load_config().await.expect("load_config");

    assert_eq!(snapshot.systems, vec![system]);
}

#[tokio::test]
async fn test_insert_and_get_call() {
    let (store, _dir) = test_store().await;

    let call = Call {
        date_time: Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap(),
        system: 1,
        talkgroup: 1001,
        frequency: Some(857_237_500),
        source: Some(4007),
        sources: vec![CallSource { pos: 0.0, src: 4007 }],
        frequencies: vec![CallFrequency {
            pos: 0.0,
            freq: 857_237_500,
            len: 2.5,
            error_count: 0,
            spike_count: 1,
        }],
        patches: vec![1002],
        audio: Some(b"RIFF....WAVE".to_vec()),
        audio_name: Some("call.wav".to_string()),
        audio_type: Some("audio/x-wav".to_string()),
        audio_url: None,
        ..Call::default()
    };

    let id = store.insert_call(&call).await.expect("insert_call");
    assert!(id >= 1);

    let stored = store.get_call(id).await.expect("get_call");
    assert_eq!(stored.id, Some(id));
    assert_eq!(stored.date_time, call.date_time);
    assert_eq!(stored.audio, call.audio);
    assert_eq!(stored.patches, call.patches);
    assert_eq!(stored.sources, call.sources);
    assert_eq!(stored.frequencies, call.frequencies);

    assert!(store.get_call(id + 100).await.is_err());
}

#[tokio::test]
async fn test_url_backed_call_has_no_blob() {
    let (store, _dir) = test_store().await;

    let call = Call {
        date_time: Utc::now(),
        system: 1,
        talkgroup: 1001,
        audio: None,
        audio_url: Some("https://archive.example.net/1.m4a".to_string()),
        ..Call::default()
    };
    let id = store.insert_call(&call).await.expect("insert_call");
    let stored = store.get_call(id).await.expect("get_call");

    assert!(stored.audio.is_none());
    assert_eq!(stored.audio_url, call.audio_url);
}

#[tokio::test]
async fn test_search_pagination_and_sort() {
    let (store, _dir) = test_store().await;

    let mut ids = Vec::new();
    for n in 1..=30i64 {
        let call = call_at(Utc.timestamp_opt(n, 0).unwrap(), 1, 1001);
        ids.push(store.insert_call(&call).await.expect("insert"));
    }

    // Newest first, first page.
    let (count, page) = store
        .search_calls(&CallSearch {
            sort_ascending: false,
            limit: 10,
            offset: 0,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 30);
    let got: Vec<i64> = page.iter().filter_map(|c| c.id).collect();
    let want: Vec<i64> = ids.iter().rev().take(10).copied().collect();
    assert_eq!(got, want);
    assert!(page.iter().all(|c| c.audio.is_none()), "results carry no audio");

    // Second page.
    let (_, page) = store
        .search_calls(&CallSearch {
            sort_ascending: false,
            limit: 10,
            offset: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    let got: Vec<i64> = page.iter().filter_map(|c| c.id).collect();
    let want: Vec<i64> = ids.iter().rev().skip(10).take(10).copied().collect();
    assert_eq!(got, want);

    // Offset past the end.
    let (count, page) = store
        .search_calls(&CallSearch {
            sort_ascending: false,
            limit: 10,
            offset: 30,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 30);
    assert!(page.is_empty());

    // Zero limit still reports the full count.
    let (count, page) = store
        .search_calls(&CallSearch {
            limit: 0,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 30);
    assert!(page.is_empty());

    // Ascending order.
    let (_, page) = store
        .search_calls(&CallSearch {
            sort_ascending: true,
            limit: 5,
            offset: 0,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    let got: Vec<i64> = page.iter().filter_map(|c| c.id).collect();
    assert_eq!(got, ids[..5].to_vec());
}

#[tokio::test]
async fn test_search_filters() {
    let (store, _dir) = test_store().await;

    for (secs, system, talkgroup) in [(1, 1, 1001), (2, 1, 1002), (3, 2, 2001), (4, 1, 1001)] {
        let call = call_at(Utc.timestamp_opt(secs, 0).unwrap(), system, talkgroup);
        store.insert_call(&call).await.expect("insert");
    }

    // Whole-system filter.
    let (count, page) = store
        .search_calls(&CallSearch {
            filters: Some(vec![SystemFilter {
                system: 1,
                talkgroups: None,
            }]),
            limit: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 3);
    assert!(page.iter().all(|c| c.system == 1));

    // Per-talkgroup restriction.
    let (count, page) = store
        .search_calls(&CallSearch {
            filters: Some(vec![SystemFilter {
                system: 1,
                talkgroups: Some(vec![1001]),
            }]),
            limit: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 2);
    assert!(page.iter().all(|c| c.talkgroup == 1001));

    // Two systems OR-ed together.
    let (count, _) = store
        .search_calls(&CallSearch {
            filters: Some(vec![
                SystemFilter {
                    system: 1,
                    talkgroups: Some(vec![1002]),
                },
                SystemFilter {
                    system: 2,
                    talkgroups: None,
                },
            ]),
            limit: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 2);

    // An empty filter list matches nothing.
    let (count, page) = store
        .search_calls(&CallSearch {
            filters: Some(Vec::new()),
            limit: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 0);
    assert!(page.is_empty());

    // Date window is half-open.
    let (count, _) = store
        .search_calls(&CallSearch {
            date_start: Some(Utc.timestamp_opt(2, 0).unwrap()),
            date_end: Some(Utc.timestamp_opt(4, 0).unwrap()),
            limit: 10,
            ..CallSearch::default()
        })
        .await
        .expect("search");
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_config_entities_roundtrip() {
    let (store, _dir) = test_store().await;

    let credential = AccessCredential {
        code: "1234".to_string(),
        ident: Some("lobby".to_string()),
        expiration: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
        limit: Some(2),
        order: Some(1),
        systems: serde_json::from_str(r#"{"1":[1001]}"#).unwrap(),
    };
    let api_key = ApiKey {
        key: "ingest-1".to_string(),
        ident: Some("feeder".to_string()),
        disabled: false,
        order: None,
        systems: Scope::All,
    };
    let downstream = Downstream {
        url: "https://peer.example.net/api/call-upload".to_string(),
        api_key: "peer-key".to_string(),
        disabled: false,
        order: None,
        systems: Scope::All,
    };
    let watch = DirWatch {
        directory: "/var/spool/radiocast".to_string(),
        extension: Some("mp3".to_string()),
        mask: Some("#DATE_#TIME_#SYS_#TG_#UNIT".to_string()),
        system_id: Some(1),
        talkgroup_id: None,
        frequency: None,
        delay: 2000,
        delete_after: true,
        disabled: false,
        order: None,
        kind: None,
        use_polling: false,
    };

    store
        .insert_access_credential(&credential)
        .await
        .expect("credential");
    store.insert_api_key(&api_key).await.expect("api key");
    store.insert_downstream(&downstream).await.expect("downstream");
    store.insert_dir_watch(&watch).await.expect("dir watch");
    store.set_config("showListenersCount", "true").await.expect("config");
    store.set_config("showListenersCount", "false").await.expect("config update");

    let snapshot = store.load_config().await.expect("load_config");
    assert_eq!(snapshot.credentials, vec![credential]);
    assert_eq!(snapshot.api_keys, vec![api_key]);
    assert_eq!(snapshot.downstreams, vec![downstream]);
    assert_eq!(snapshot.dir_watches, vec![watch]);
    assert_eq!(
        snapshot.settings.get("showListenersCount").map(String::as_str),
        Some("false")
    );
}

#[tokio::test]
async fn test_append_log() {
    let (store, _dir) = test_store().await;
    let since = Utc::now() - chrono::Duration::seconds(1);

    store.append_log("info", "listener connected").await.expect("log");
    store.append_log("error", "downstream unreachable").await.expect("log");

    let logs = store.recent_logs(since).await.expect("recent_logs");
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().any(|(_, level, message)| {
        level == "error" && message == "downstream unreachable"
    }));
}
