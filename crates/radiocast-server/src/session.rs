//! Listener session
//!
//! One task per accepted WebSocket. The loop multiplexes the inbound
//! control frames, the session's bounded outbound queue and the shutdown
//! signal; outbound frames always drain ahead of a shutdown so protocol
//! signals like `XPR`/`MAX` reach the client before the close. The
//! dispatcher and the admission ticker only ever touch the queue and the
//! shutdown handle, never the socket.

use crate::access::{self, Permission};
use crate::admission::{AdmitOutcome, Registration};
use crate::dispatcher::{FilterHandle, SessionFilter, SessionHandle, SessionId};
use crate::playback;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use futures_util::StreamExt;
use futures_util::stream::SplitSink;
use parking_lot::RwLock;
use radiocast_core::CallId;
use radiocast_core::protocol::{self, ClientMessage, ServerMessage};
use radiocast_core::types::{
    LivefeedMap, SETTING_SHOW_LISTENERS_COUNT, SearchOptions, SearchResults,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Whether the session loop keeps running after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

type Sink = SplitSink<WebSocket, Message>;

async fn send_frame(sink: &mut Sink, message: &ServerMessage) -> Result<(), axum::Error> {
    match protocol::encode_server(message) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(err) => {
            warn!(error = %err, "dropping unencodable frame");
            Ok(())
        }
    }
}

/// Drive one accepted WebSocket until it closes
pub async fn run_session(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (queue_tx, mut queue_rx) =
        mpsc::channel::<ServerMessage>(state.config.session.queue_depth.max(1));
    let shutdown = Arc::new(Notify::new());
    let mut server_shutdown = state.subscribe_shutdown();

    debug!(session = %id, client = %addr, "session opened");

    // The protocol version goes out before anything else.
    let greeting = ServerMessage::Version {
        branding: state.config.server.branding.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if send_frame(&mut sink, &greeting).await.is_err() {
        return;
    }

    let mut session = Session {
        id,
        state: state.clone(),
        permission: None,
        snapshot_version: 0,
        filter: None,
        livefeed: None,
        cursor: None,
        queue_tx: queue_tx.clone(),
        shutdown: shutdown.clone(),
    };

    loop {
        tokio::select! {
            biased;

            Some(message) = queue_rx.recv() => {
                if send_frame(&mut sink, &message).await.is_err() {
                    break;
                }
            }

            () = shutdown.notified() => {
                drain_and_close(&mut sink, &mut queue_rx).await;
                break;
            }

            _ = server_shutdown.recv() => {
                drain_and_close(&mut sink, &mut queue_rx).await;
                break;
            }

            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if session.handle_text(&text).await == Flow::Close {
                        drain_and_close(&mut sink, &mut queue_rx).await;
                        break;
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    debug!(session = %id, error = %err, "transport error");
                    break;
                }
            },
        }
    }

    state.dispatcher.unregister(&id);
    state.admission.release(&id);
    debug!(session = %id, "session closed");
}

/// Flush queued frames, then send the close frame
async fn drain_and_close(sink: &mut Sink, queue_rx: &mut mpsc::Receiver<ServerMessage>) {
    while let Ok(message) = queue_rx.try_recv() {
        if send_frame(sink, &message).await.is_err() {
            return;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

struct Session {
    id: SessionId,
    state: Arc<AppState>,
    permission: Option<Permission>,
    snapshot_version: u64,
    filter: Option<FilterHandle>,
    livefeed: Option<LivefeedMap>,
    cursor: Option<SearchResults>,
    queue_tx: mpsc::Sender<ServerMessage>,
    shutdown: Arc<Notify>,
}

impl Session {
    /// Queue an outbound frame; a saturated queue drops the session
    fn enqueue(&self, message: ServerMessage) -> Flow {
        match self.queue_tx.try_send(message) {
            Ok(()) => Flow::Continue,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, "outbound queue full, dropping session");
                Flow::Close
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Flow::Close,
        }
    }

    async fn handle_text(&mut self, text: &str) -> Flow {
        let message = match protocol::decode_client(text) {
            Ok(message) => message,
            Err(err) => {
                debug!(session = %self.id, error = %err, "unparseable frame");
                return Flow::Close;
            }
        };

        if self.permission.is_some() && self.refresh_permission() == Flow::Close {
            return Flow::Close;
        }

        match message {
            ClientMessage::Version => self.enqueue(ServerMessage::Version {
                branding: self.state.config.server.branding.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            }),
            ClientMessage::Pin(code) => self.handle_pin(&code),
            ClientMessage::Livefeed(map) => self.handle_livefeed(map),
            ClientMessage::List(options) => self.handle_list(options).await,
            ClientMessage::Call { id, flag } => self.handle_call(id, flag).await,
            ClientMessage::Unknown(tag) => {
                debug!(session = %self.id, tag, "ignoring unknown command");
                Flow::Continue
            }
        }
    }

    /// Re-derive the permission when the config snapshot moved; always
    /// enforce expiry at ingress
    fn refresh_permission(&mut self) -> Flow {
        let Some(current) = self.permission.clone() else {
            return Flow::Continue;
        };

        let version = self.state.config_version();
        if version != self.snapshot_version {
            let snapshot = self.state.config_snapshot();
            match access::resolve_credential(&snapshot, &current.code) {
                Ok(fresh) => {
                    self.snapshot_version = version;
                    if let Some(filter) = &self.filter {
                        let mut livefeed = self.livefeed.clone();
                        if let Some(map) = &mut livefeed {
                            map.retain_allowed(&fresh.scope);
                        }
                        *filter.write() = Arc::new(SessionFilter {
                            scope: fresh.scope.clone(),
                            livefeed: livefeed.clone(),
                        });
                        self.livefeed = livefeed;
                    }
                    self.permission = Some(fresh);
                }
                Err(_) => {
                    info!(session = %self.id, "credential revoked by reload");
                    let _ = self.enqueue(ServerMessage::Expired);
                    return Flow::Close;
                }
            }
        }

        if self
            .permission
            .as_ref()
            .is_some_and(Permission::is_expired)
        {
            info!(session = %self.id, "credential expired");
            let _ = self.enqueue(ServerMessage::Expired);
            return Flow::Close;
        }
        Flow::Continue
    }

    fn handle_pin(&mut self, code: &str) -> Flow {
        if self.permission.is_some() {
            return Flow::Continue;
        }

        let snapshot = self.state.config_snapshot();
        let version = self.state.config_version();
        let permission = match access::resolve_credential(&snapshot, code) {
            Ok(permission) => permission,
            Err(reject) => {
                info!(session = %self.id, ?reject, "credential refused");
                let _ = self.enqueue(ServerMessage::Expired);
                return Flow::Close;
            }
        };

        let registration = Registration {
            code: permission.code.clone(),
            limit: permission.limit,
            expiration: permission.expiration,
            tx: self.queue_tx.clone(),
            shutdown: self.shutdown.clone(),
            listener_count: snapshot.setting_enabled(SETTING_SHOW_LISTENERS_COUNT),
        };
        if self.state.admission.admit(self.id, registration) == AdmitOutcome::TooMany {
            info!(session = %self.id, code = %permission.code, "too many sessions for credential");
            let _ = self.enqueue(ServerMessage::TooMany);
            return Flow::Close;
        }

        let filter: FilterHandle = Arc::new(RwLock::new(Arc::new(SessionFilter {
            scope: permission.scope.clone(),
            livefeed: None,
        })));
        self.state.dispatcher.register(
            self.id,
            SessionHandle {
                filter: filter.clone(),
                tx: self.queue_tx.clone(),
                shutdown: self.shutdown.clone(),
            },
        );
        self.filter = Some(filter);
        self.snapshot_version = version;

        let config = snapshot.public_config(&permission.scope);
        info!(
            session = %self.id,
            ident = permission.ident.as_deref().unwrap_or("-"),
            "listener authenticated"
        );
        self.permission = Some(permission);

        if self.enqueue(ServerMessage::PinAck) == Flow::Close {
            return Flow::Close;
        }
        self.enqueue(ServerMessage::Config(Box::new(config)))
    }

    fn handle_livefeed(&mut self, map: Option<LivefeedMap>) -> Flow {
        let (Some(permission), Some(filter)) = (&self.permission, &self.filter) else {
            return Flow::Continue;
        };

        // Entries outside the credential scope are silently dropped.
        let livefeed = map.map(|mut map| {
            map.retain_allowed(&permission.scope);
            map
        });
        *filter.write() = Arc::new(SessionFilter {
            scope: permission.scope.clone(),
            livefeed: livefeed.clone(),
        });
        self.livefeed = livefeed;
        Flow::Continue
    }

    async fn handle_list(&mut self, options: SearchOptions) -> Flow {
        let Some(permission) = self.permission.clone() else {
            return Flow::Continue;
        };
        let snapshot = self.state.config_snapshot();
        let results = playback::search_calls(
            &self.state.store,
            &snapshot,
            options,
            &permission.scope,
            self.state.config.search.max_results,
        )
        .await;

        // Same filter, moved offset: the client is walking pages.
        let walking = self.cursor.as_ref().is_some_and(|previous| {
            previous.count == results.count
                && previous.options.offset != results.options.offset
        });
        debug!(
            session = %self.id,
            count = results.count,
            returned = results.results.len(),
            walking,
            "search served"
        );
        self.cursor = Some(results.clone());
        self.enqueue(ServerMessage::List(Box::new(results)))
    }

    async fn handle_call(&mut self, call_id: CallId, flag: Option<Value>) -> Flow {
        let Some(permission) = self.permission.clone() else {
            return Flow::Continue;
        };

        match self.state.store.get_call(call_id).await {
            Ok(call) => {
                let allowed = permission.allows(call.system, call.talkgroup)
                    || call
                        .patches
                        .iter()
                        .any(|&patch| permission.allows(call.system, patch));
                if !allowed {
                    debug!(session = %self.id, call = call_id, "call outside permission");
                    return Flow::Continue;
                }
                self.enqueue(ServerMessage::Call {
                    call: Box::new(call),
                    flag,
                })
            }
            Err(err) => {
                debug!(session = %self.id, call = call_id, error = %err, "call fetch failed");
                Flow::Continue
            }
        }
    }
}
