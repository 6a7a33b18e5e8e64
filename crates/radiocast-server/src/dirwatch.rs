//! Directory-watcher ingestor
//!
//! One watcher task per enabled `DirWatch` row. New files settle for the
//! configured delay (debounced), have their metadata recovered from the
//! filename mask, and join the same validation pipeline as HTTP uploads.

use crate::ingest::{self, CallExtras, IngestSource};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use notify::{EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, Debouncer, FileIdMap, new_debouncer_opt};
use radiocast_core::types::{Call, DirWatch};
use radiocast_core::utils::{FileMetadata, infer_audio_type, parse_filename_mask};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

// Watchers of either flavor, kept alive for the task's lifetime.
enum ActiveDebouncer {
    Native(Debouncer<RecommendedWatcher, FileIdMap>),
    Poll(Debouncer<PollWatcher, FileIdMap>),
}

/// Spawn one watcher task per enabled watch row
pub fn spawn_watchers(state: &Arc<AppState>) -> Vec<JoinHandle<()>> {
    state
        .config_snapshot()
        .dir_watches
        .iter()
        .filter(|watch| !watch.disabled)
        .map(|watch| {
            let state = state.clone();
            let watch = watch.clone();
            tokio::spawn(async move { watch_directory(state, watch).await })
        })
        .collect()
}

async fn watch_directory(state: Arc<AppState>, watch: DirWatch) {
    if let Err(err) = tokio::fs::create_dir_all(&watch.directory).await {
        error!(directory = %watch.directory, error = %err, "cannot create watch directory");
        return;
    }

    let (tx, mut rx) = mpsc::channel::<PathBuf>(256);
    let settle = Duration::from_millis(if watch.delay == 0 { 2_000 } else { watch.delay });

    let _debouncer = if watch.use_polling {
        match start_debouncer::<PollWatcher>(&watch, settle, tx) {
            Ok(debouncer) => ActiveDebouncer::Poll(debouncer),
            Err(err) => {
                error!(directory = %watch.directory, error = %err, "cannot watch directory");
                return;
            }
        }
    } else {
        match start_debouncer::<RecommendedWatcher>(&watch, settle, tx) {
            Ok(debouncer) => ActiveDebouncer::Native(debouncer),
            Err(err) => {
                error!(directory = %watch.directory, error = %err, "cannot watch directory");
                return;
            }
        }
    };

    info!(
        directory = %watch.directory,
        polling = watch.use_polling,
        "watching ingest directory"
    );

    while let Some(path) = rx.recv().await {
        match handle_file(&state, &watch, &path).await {
            Ok(()) => {
                if watch.delete_after {
                    if let Err(err) = tokio::fs::remove_file(&path).await {
                        warn!(path = %path.display(), error = %err, "cannot remove ingested file");
                    }
                }
            }
            Err(reason) => {
                warn!(path = %path.display(), reason, "watched file rejected");
            }
        }
    }
}

fn start_debouncer<W: Watcher>(
    watch: &DirWatch,
    settle: Duration,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<Debouncer<W, FileIdMap>> {
    let extension = watch.extension.clone();
    let runtime = tokio::runtime::Handle::current();

    let mut debouncer = new_debouncer_opt::<_, W, FileIdMap>(
        settle,
        None,
        move |result: DebounceEventResult| match result {
            Ok(events) => {
                for event in events {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if !path.is_file() || !extension_matches(path, extension.as_deref()) {
                            continue;
                        }
                        let tx = tx.clone();
                        let path = path.clone();
                        runtime.spawn(async move {
                            let _ = tx.send(path).await;
                        });
                    }
                }
            }
            Err(errors) => {
                for err in errors {
                    error!(error = %err, "file watcher error");
                }
            }
        },
        FileIdMap::new(),
        notify::Config::default(),
    )?;

    debouncer
        .watcher()
        .watch(Path::new(&watch.directory), RecursiveMode::NonRecursive)?;
    Ok(debouncer)
}

fn extension_matches(path: &Path, wanted: Option<&str>) -> bool {
    let Some(wanted) = wanted else { return true };
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}

async fn handle_file(state: &AppState, watch: &DirWatch, path: &Path) -> Result<(), String> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| "invalid file name".to_string())?
        .to_string();

    let audio = tokio::fs::read(path).await.map_err(|e| e.to_string())?;
    if audio.is_empty() {
        return Err("empty file".to_string());
    }

    let meta = match &watch.mask {
        Some(mask) => parse_filename_mask(&filename, mask).map_err(|e| e.to_string())?,
        None => FileMetadata::default(),
    };

    let date_time = meta
        .date_time()
        .or_else(|| file_modified(path))
        .unwrap_or_else(Utc::now);
    let system = meta
        .system
        .or(watch.system_id)
        .ok_or_else(|| "no system id for watched file".to_string())?;
    let talkgroup = meta
        .talkgroup
        .or(watch.talkgroup_id)
        .ok_or_else(|| "no talkgroup id for watched file".to_string())?;

    let call = Call {
        id: None,
        date_time,
        system,
        talkgroup,
        frequency: meta.frequency.or(watch.frequency),
        source: meta.unit,
        sources: Vec::new(),
        frequencies: Vec::new(),
        patches: Vec::new(),
        audio: Some(audio),
        audio_type: infer_audio_type(&filename).map(str::to_string),
        audio_name: Some(filename),
        audio_url: None,
    };

    ingest::ingest_call(state, IngestSource::Trusted, call, CallExtras::default())
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

fn file_modified(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
