// WebSocket push server.
//
// Protocol: the first client frame must be `{"type":"AUTH","token":...}`,
// sent within `AUTH_TIMEOUT`. After `READY` the server pushes every live event
// addressed to the user as an `EVENT` frame. Clients may send `PING` (answered
// with `PONG`) and `SEND` to post a chat message. The session is checked
// again before every `SEND`, before every pushed event and every
// `SESSION_CHECK_INTERVAL`; a revoked session closes the connection.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::chat::ChatMessage;
use crate::db::{blocking, Database};
use crate::error::{Error, Result};
use crate::live::LivePayload;
use crate::users::User;

pub const AUTH_TIMEOUT: Duration = Duration::from_secs(10);
pub const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// An authenticated connection: the user as of `AUTH` and the token they
/// presented.
#[derive(Debug, Clone)]
pub struct WsSession {
    pub user: User,
    pub token: String,
}

/// Frames sent by clients.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    Auth { token: String },
    Ping,
    Send { channel_id: i64, content: String },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    Ready { user_id: i64 },
    Event { event: LivePayload },
    Pong,
    Sent { message: ChatMessage },
    Error { code: String, message: String },
}

impl ServerFrame {
    pub fn error(err: &Error) -> Self {
        let message = if err.is_client_error() {
            err.to_string()
        } else {
            "internal error".to_string()
        };
        ServerFrame::Error {
            code: err.code().to_string(),
            message,
        }
    }

    pub fn to_message(&self) -> Message {
        match serde_json::to_string(self) {
            Ok(json) => Message::text(json),
            Err(e) => {
                warn!("failed to encode websocket frame: {e}");
                Message::text(r#"{"type":"ERROR","code":"SERIALIZATION_ERROR","message":"internal error"}"#)
            }
        }
    }
}

/// What each connection needs from the rest of the server.
#[derive(Clone)]
pub struct WsContext {
    pub db: Arc<Database>,
    pub max_message_length: usize,
}

/// Bind `host:port` and serve WebSocket clients until the task is cancelled.
pub async fn run(host: &str, port: u16, ctx: WsContext) -> anyhow::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    info!("WebSocket server listening on {}", listener.local_addr()?);
    serve(listener, ctx).await
}

/// Accept loop on an already bound listener. Each client gets its own task.
pub async fn serve(listener: TcpListener, ctx: WsContext) -> anyhow::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let addr = addr.to_string();
            match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => handle_connection(ws, ctx, &addr).await,
                Err(e) => warn!("WebSocket handshake failed for {addr}: {e}"),
            }
        });
    }
}

async fn handle_connection<S>(ws: WebSocketStream<S>, ctx: WsContext, addr: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = ws.split();

    let authenticated = tokio::time::timeout(AUTH_TIMEOUT, authenticate(&mut read, &ctx.db)).await;
    let session = match authenticated {
        Ok(Ok(session)) => session,
        Ok(Err(err)) => {
            debug!("WebSocket client {addr} failed to authenticate: {err}");
            let _ = write.send(ServerFrame::error(&err).to_message()).await;
            let _ = write.send(Message::Close(None)).await;
            return;
        }
        Err(_) => {
            debug!("WebSocket client {addr} did not authenticate in time");
            let frame = ServerFrame::Error {
                code: Error::Unauthenticated.code().to_string(),
                message: "authentication timed out".to_string(),
            };
            let _ = write.send(frame.to_message()).await;
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    };

    let user_id = session.user.id;
    info!(user_id, "WebSocket client {addr} authenticated");
    let mut subscription = ctx.db.hub().subscribe(user_id);
    if write
        .send(ServerFrame::Ready { user_id }.to_message())
        .await
        .is_err()
    {
        return;
    }

    let mut session_check = tokio::time::interval(SESSION_CHECK_INTERVAL);
    session_check.tick().await;

    loop {
        tokio::select! {
            event = subscription.next() => {
                let Some(event) = event else { break };
                if let Err(err) = resolve_session(&ctx.db, &session.token).await {
                    revoke(&mut write, &err, addr).await;
                    break;
                }
                let frame = ServerFrame::Event { event: event.payload.clone() };
                if write.send(frame.to_message()).await.is_err() {
                    break;
                }
            }
            _ = session_check.tick() => {
                if let Err(err) = resolve_session(&ctx.db, &session.token).await {
                    revoke(&mut write, &err, addr).await;
                    break;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_client_text(&ctx, &session, text.as_str()).await;
                    if write.send(reply.to_message()).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client {addr} sent close frame");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error from {addr}: {e}");
                    break;
                }
                Some(Ok(_)) => {
                    // Binary, Ping, Pong and raw frames carry nothing for us.
                }
            }
        }
    }
    info!(user_id, "WebSocket client {addr} disconnected");
}

/// Tell the client its session is gone and close the socket.
async fn revoke<W>(write: &mut W, err: &Error, addr: &str)
where
    W: futures_util::Sink<Message> + Unpin,
{
    info!("WebSocket client {addr} lost its session: {err}");
    let _ = write.send(ServerFrame::error(err).to_message()).await;
    let _ = write.send(Message::Close(None)).await;
}

/// The session's current user, or the reason it is no longer valid (logged
/// out, expired, or suspended).
pub async fn resolve_session(db: &Arc<Database>, token: &str) -> Result<User> {
    let token = token.to_string();
    blocking(db, move |db| db.user_for_token(&token)).await
}

/// Read frames until the first text frame and resolve it as an `AUTH` frame.
///
/// Generic over the stream so it can be driven by in-memory streams in tests.
pub async fn authenticate<St>(stream: &mut St, db: &Arc<Database>) -> Result<WsSession>
where
    St: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                return match serde_json::from_str::<ClientFrame>(text.as_str()) {
                    Ok(ClientFrame::Auth { token }) => {
                        let user = resolve_session(db, &token).await?;
                        Ok(WsSession { user, token })
                    }
                    Ok(_) => Err(Error::Unauthenticated),
                    Err(_) => Err(Error::validation("frame", "expected an AUTH frame")),
                };
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    Err(Error::Unauthenticated)
}

/// Handle one text frame from an authenticated client, returning the reply.
pub async fn handle_client_text(ctx: &WsContext, session: &WsSession, text: &str) -> ServerFrame {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => return ServerFrame::error(&Error::validation("frame", e.to_string())),
    };
    match frame {
        ClientFrame::Ping => ServerFrame::Pong,
        ClientFrame::Auth { .. } => {
            ServerFrame::error(&Error::validation("frame", "already authenticated"))
        }
        ClientFrame::Send {
            channel_id,
            content,
        } => {
            let token = session.token.clone();
            let max = ctx.max_message_length;
            let posted = blocking(&ctx.db, move |db| {
                let user = db.user_for_token(&token)?;
                db.post_message(&user, channel_id, &content, max)
            })
            .await;
            match posted {
                Ok(message) => ServerFrame::Sent { message },
                Err(err) => ServerFrame::error(&err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChannelInput;
    use crate::db::now;
    use crate::db::test_support::{insert_user, test_db};
    use crate::users::{new_session_token, token_digest, Role};
    use chrono::Duration as ChronoDuration;
    use futures_util::stream;

    /// Helper: create a stream of Message results from a vec.
    fn mock_stream(
        messages: Vec<std::result::Result<Message, WsError>>,
    ) -> impl Stream<Item = std::result::Result<Message, WsError>> + Unpin {
        stream::iter(messages)
    }

    fn session_for(db: &Database, user: &User) -> String {
        let token = new_session_token();
        db.conn()
            .execute(
                "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![token_digest(&token), user.id, now(), now() + ChronoDuration::hours(1)],
            )
            .unwrap();
        token
    }

    fn ws_session(db: &Database, user: &User) -> WsSession {
        WsSession {
            user: user.clone(),
            token: session_for(db, user),
        }
    }

    fn auth_frame(token: &str) -> Message {
        Message::text(format!(r#"{{"type":"AUTH","token":"{token}"}}"#))
    }

    #[test]
    fn client_frames_parse() {
        let send: ClientFrame =
            serde_json::from_str(r#"{"type":"SEND","channelId":3,"content":"hi"}"#).unwrap();
        assert_eq!(
            send,
            ClientFrame::Send {
                channel_id: 3,
                content: "hi".into()
            }
        );
        let ping: ClientFrame = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert_eq!(ping, ClientFrame::Ping);
    }

    #[test]
    fn server_frames_serialize_with_type_tag() {
        let ready = serde_json::to_value(ServerFrame::Ready { user_id: 9 }).unwrap();
        assert_eq!(ready, serde_json::json!({"type": "READY", "userId": 9}));
        let pong = serde_json::to_value(ServerFrame::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "PONG"}));
    }

    #[tokio::test]
    async fn valid_token_authenticates() {
        let db = Arc::new(test_db());
        let user = insert_user(&db, "Socket", Role::User);
        let token = session_for(&db, &user);

        let mut stream = mock_stream(vec![
            Ok(Message::Ping(vec![].into())),
            Ok(auth_frame(&token)),
        ]);
        let authed = authenticate(&mut stream, &db).await.unwrap();
        assert_eq!(authed.user.id, user.id);
        assert_eq!(authed.token, token);
    }

    #[tokio::test]
    async fn bad_token_rejected() {
        let db = Arc::new(test_db());
        let mut stream = mock_stream(vec![Ok(auth_frame("nope"))]);
        assert!(matches!(
            authenticate(&mut stream, &db).await,
            Err(Error::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn first_text_frame_must_be_auth() {
        let db = Arc::new(test_db());
        let user = insert_user(&db, "Socket", Role::User);
        let token = session_for(&db, &user);
        let mut stream = mock_stream(vec![
            Ok(Message::text(r#"{"type":"PING"}"#)),
            Ok(auth_frame(&token)),
        ]);
        assert!(authenticate(&mut stream, &db).await.is_err());
    }

    #[tokio::test]
    async fn closed_stream_is_unauthenticated() {
        let db = Arc::new(test_db());
        let mut stream = mock_stream(vec![Ok(Message::Close(None))]);
        assert!(matches!(
            authenticate(&mut stream, &db).await,
            Err(Error::Unauthenticated)
        ));
        let mut empty = mock_stream(vec![]);
        assert!(authenticate(&mut empty, &db).await.is_err());
    }

    #[tokio::test]
    async fn ping_answered_with_pong() {
        let db = Arc::new(test_db());
        let user = insert_user(&db, "Socket", Role::User);
        let session = ws_session(&db, &user);
        let ctx = WsContext {
            db,
            max_message_length: 100,
        };
        assert_eq!(
            handle_client_text(&ctx, &session, r#"{"type":"PING"}"#).await,
            ServerFrame::Pong
        );
        assert!(matches!(
            handle_client_text(&ctx, &session, "not json").await,
            ServerFrame::Error { ref code, .. } if code == "VALIDATION_ERROR"
        ));
    }

    #[tokio::test]
    async fn send_posts_and_reaches_other_members() {
        let db = Arc::new(test_db());
        let sender = insert_user(&db, "Sender", Role::User);
        let peer = insert_user(&db, "Peer", Role::User);
        let channel = db
            .create_channel(
                &sender,
                &ChannelInput {
                    name: "lobby".into(),
                    description: None,
                    is_private: false,
                },
            )
            .unwrap();
        db.join_channel(&peer, channel.id).unwrap();
        let mut peer_sub = db.hub().subscribe(peer.id);

        let ctx = WsContext {
            db: Arc::clone(&db),
            max_message_length: 100,
        };
        let text = format!(r#"{{"type":"SEND","channelId":{},"content":"hello"}}"#, channel.id);
        let reply = handle_client_text(&ctx, &ws_session(&db, &sender), &text).await;
        let ServerFrame::Sent { message } = reply else {
            panic!("expected SENT, got {reply:?}");
        };
        assert_eq!(message.content, "hello");

        let event = peer_sub.next().await.unwrap();
        assert_eq!(event.payload, LivePayload::Chat(message));
    }

    #[tokio::test]
    async fn send_to_foreign_channel_is_error_frame() {
        let db = Arc::new(test_db());
        let user = insert_user(&db, "User", Role::User);
        let session = ws_session(&db, &user);
        let ctx = WsContext {
            db,
            max_message_length: 100,
        };
        let reply = handle_client_text(&ctx, &session, r#"{"type":"SEND","channelId":42,"content":"x"}"#).await;
        assert_eq!(
            reply,
            ServerFrame::Error {
                code: "NOT_FOUND".into(),
                message: "channel not found: 42".into()
            }
        );
    }

    #[tokio::test]
    async fn suspended_member_cannot_send_on_open_socket() {
        let db = Arc::new(test_db());
        let admin = insert_user(&db, "Admin", Role::Admin);
        let sender = insert_user(&db, "Sender", Role::User);
        let channel = db
            .create_channel(
                &sender,
                &ChannelInput {
                    name: "lobby".into(),
                    description: None,
                    is_private: false,
                },
            )
            .unwrap();
        let session = ws_session(&db, &sender);
        let ctx = WsContext {
            db: Arc::clone(&db),
            max_message_length: 100,
        };

        db.set_banned(&admin, sender.id, true).unwrap();

        let text = format!(r#"{{"type":"SEND","channelId":{},"content":"after ban"}}"#, channel.id);
        let reply = handle_client_text(&ctx, &session, &text).await;
        assert!(
            matches!(reply, ServerFrame::Error { ref code, .. } if code == "UNAUTHENTICATED" || code == "FORBIDDEN"),
            "expected an error frame, got {reply:?}"
        );
        assert!(db.list_messages(&admin, channel.id, None, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_session_fails_after_logout_and_ban() {
        let db = Arc::new(test_db());
        let admin = insert_user(&db, "Admin", Role::Admin);
        let member = insert_user(&db, "Member", Role::User);

        let token = session_for(&db, &member);
        assert_eq!(resolve_session(&db, &token).await.unwrap().id, member.id);
        db.logout(&token).unwrap();
        assert!(matches!(
            resolve_session(&db, &token).await,
            Err(Error::Unauthenticated)
        ));

        let token = session_for(&db, &member);
        db.set_banned(&admin, member.id, true).unwrap();
        assert!(resolve_session(&db, &token).await.is_err());
    }
}
