//! C6 — the admin websocket server (§4.6, §6.3). One `/ws`-equivalent TCP
//! listener per channel process; every connection is its own task on the
//! calloop futures executor, racing incoming frames against `async-io`
//! timers for the auth handshake and the heartbeat. Because the executor is
//! single-threaded and cooperative, a connection task can borrow
//! [`crate::state::Host`] directly to dispatch `call_action` — no separate
//! `calloop::channel` hop is needed the way `process` needs one for
//! genuinely blocking I/O.

pub mod protocol;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use async_net::{TcpListener, TcpStream};
use async_tungstenite::tungstenite::Message;
use async_tungstenite::WebSocketStream;
use calloop::futures::Scheduler;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_lite::{AsyncRead, AsyncWrite};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use mlua::Lua;

use crate::channel::Channel;
use crate::registry::RegistryObserver;
use crate::script;
use crate::state::Host;

use protocol::{encode_notification, encode_ping, encode_pong, encode_system_info, ClientFrame, Notification};

/// Timing knobs for the handshake and heartbeat (§4.6 "conventionally").
#[derive(Clone, Copy)]
pub struct AdminConfig {
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

type Clients = Rc<RefCell<Vec<UnboundedSender<String>>>>;

/// Forwards registry changes to every currently-authenticated client
/// (§4.6 "Live updates"). Registered with [`crate::registry::Registry`] as
/// a `Box<dyn RegistryObserver>`; connection tasks separately hold the
/// `Rc` to append their own sender once they pass auth.
pub struct BroadcastObserver {
    clients: Clients,
}

impl BroadcastObserver {
    fn broadcast(&self, text: String) {
        self.clients
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(text.clone()).is_ok());
    }
}

impl RegistryObserver for BroadcastObserver {
    fn module_status_changed(&mut self, plugin_instance: &str, module: &str, new_status: Option<&str>) {
        self.broadcast(encode_notification(Notification::ModuleStatusUpdate {
            plugin_instance: plugin_instance.to_string(),
            module: module.to_string(),
            new_status: new_status.map(str::to_string),
        }));
    }

    fn module_message_changed(&mut self, plugin_instance: &str, module: &str, new_message: Option<&str>) {
        self.broadcast(encode_notification(Notification::ModuleMessageUpdate {
            plugin_instance: plugin_instance.to_string(),
            module: module.to_string(),
            new_message: new_message.map(str::to_string),
        }));
    }

    fn module_active_actions_changed(&mut self, plugin_instance: &str, module: &str, new_active_actions: &[String]) {
        self.broadcast(encode_notification(Notification::ModuleActiveActionsUpdate {
            plugin_instance: plugin_instance.to_string(),
            module: module.to_string(),
            new_active_actions: new_active_actions.to_vec(),
        }));
    }
}

/// Binds the admin port and schedules the accept loop on `scheduler`.
/// Returns the [`RegistryObserver`] to hand to `registry.add_observer`.
pub fn start(
    scheduler: &Scheduler<()>,
    host: Rc<RefCell<Host>>,
    lua: Lua,
    channel: Channel,
    password: Option<String>,
    config: AdminConfig,
) -> BroadcastObserver {
    let clients: Clients = Rc::new(RefCell::new(Vec::new()));
    let observer = BroadcastObserver {
        clients: clients.clone(),
    };

    let port = channel.admin_port();
    let scheduler_for_accept = scheduler.clone();
    let accept_loop = async move {
        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::error!(%err, port, "admin websocket bind failed");
                return;
            }
        };
        tracing::info!(port, "admin websocket listening");
        let mut incoming = listener.incoming();
        while let Some(stream) = incoming.next().await {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::warn!(%err, "admin websocket accept failed");
                    continue;
                }
            };
            let task = handle_connection(
                stream,
                host.clone(),
                lua.clone(),
                scheduler_for_accept.clone(),
                password.clone(),
                clients.clone(),
                config,
            );
            let _ = scheduler_for_accept.schedule(task);
        }
    };
    let _ = scheduler.schedule(accept_loop);

    observer
}

/// Races an incoming frame against an absolute deadline (§4.6 "Handshake").
async fn recv_by(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, async_tungstenite::tungstenite::Error>> + Unpin),
    deadline: Instant,
) -> Option<Result<Message, async_tungstenite::tungstenite::Error>> {
    enum Outcome {
        Frame(Option<Result<Message, async_tungstenite::tungstenite::Error>>),
        TimedOut,
    }
    let frame = async { Outcome::Frame(ws.next().await) };
    let timer = async {
        async_io::Timer::at(deadline).await;
        Outcome::TimedOut
    };
    match futures_lite::future::race(frame, timer).await {
        Outcome::Frame(frame) => frame,
        Outcome::TimedOut => None,
    }
}

/// The auth handshake (§4.6 "Handshake", §8 scenario S4). Non-text and
/// unrecognized frames are ignored rather than treated as a wrong password,
/// so a stray ping before the client sends its password does not fail it.
async fn authenticate(
    ws: &mut (impl futures_util::Stream<Item = Result<Message, async_tungstenite::tungstenite::Error>> + Unpin),
    expected: Option<&str>,
    timeout: Duration,
) -> Result<(), crate::error::CoreError> {
    let deadline = Instant::now() + timeout;
    loop {
        let Some(frame) = recv_by(ws, deadline).await else {
            return Err(crate::error::CoreError::AuthTimeout);
        };
        let message = frame.map_err(|_| crate::error::CoreError::AuthRejected)?;
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => return Err(crate::error::CoreError::AuthRejected),
            _ => continue,
        };
        return match ClientFrame::parse(&text) {
            ClientFrame::Password(given) if expected.is_some_and(|pw| pw == given) => Ok(()),
            _ => Err(crate::error::CoreError::AuthRejected),
        };
    }
}

enum ConnEvent {
    Incoming(Option<Result<Message, async_tungstenite::tungstenite::Error>>),
    Outgoing(String),
    HeartbeatDue,
}

async fn handle_connection(
    stream: TcpStream,
    host: Rc<RefCell<Host>>,
    lua: Lua,
    scheduler: Scheduler<()>,
    password: Option<String>,
    clients: Clients,
    config: AdminConfig,
) {
    let ws = match async_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(err) => {
            tracing::warn!(%err, "admin websocket upgrade failed");
            return;
        }
    };
    let (mut write, mut read) = ws.split();

    if let Err(err) = authenticate(&mut read, password.as_deref(), config.auth_timeout).await {
        let reason = err.ws_close_reason().unwrap_or("auth");
        tracing::info!(reason, "admin websocket auth failed");
        let _ = close(&mut write, reason).await;
        return;
    }

    let snapshot = encode_system_info(host.borrow().registry.snapshot());
    if write_text(&mut write, snapshot).await.is_err() {
        return;
    }

    let (outbox_tx, mut outbox_rx) = unbounded::<String>();
    clients.borrow_mut().push(outbox_tx);

    let mut awaiting_pong = false;
    let mut next_ping_at = Instant::now() + config.heartbeat_interval;

    loop {
        let incoming = async { ConnEvent::Incoming(read.next().await) };
        let outgoing = async {
            match outbox_rx.next().await {
                Some(text) => ConnEvent::Outgoing(text),
                None => ConnEvent::HeartbeatDue,
            }
        };
        let tick = async {
            async_io::Timer::at(next_ping_at).await;
            ConnEvent::HeartbeatDue
        };
        let event = futures_lite::future::race(incoming, futures_lite::future::race(outgoing, tick)).await;

        match event {
            ConnEvent::Incoming(Some(Ok(Message::Text(text)))) => match ClientFrame::parse(&text) {
                ClientFrame::Pong => awaiting_pong = false,
                ClientFrame::Ping => {
                    if write_text(&mut write, encode_pong()).await.is_err() {
                        break;
                    }
                }
                ClientFrame::Request(request) => {
                    dispatch_call_action(&host, &lua, &scheduler, request.body.call_action);
                }
                ClientFrame::Password(_) | ClientFrame::Unrecognized => {
                    tracing::debug!("admin websocket: unrecognized frame after auth");
                }
            },
            ConnEvent::Incoming(Some(Ok(Message::Close(_)))) | ConnEvent::Incoming(None) => break,
            ConnEvent::Incoming(Some(Ok(_))) => {}
            ConnEvent::Incoming(Some(Err(err))) => {
                tracing::debug!(%err, "admin websocket read error");
                break;
            }
            ConnEvent::Outgoing(text) => {
                if write_text(&mut write, text).await.is_err() {
                    break;
                }
            }
            ConnEvent::HeartbeatDue => {
                if awaiting_pong {
                    tracing::info!("admin websocket heartbeat missed, closing");
                    let _ = write.close().await;
                    break;
                }
                if write_text(&mut write, encode_ping()).await.is_err() {
                    break;
                }
                awaiting_pong = true;
                next_ping_at = Instant::now() + config.heartbeat_interval;
            }
        }
    }
}

fn dispatch_call_action(
    host: &Rc<RefCell<Host>>,
    lua: &Lua,
    scheduler: &Scheduler<()>,
    call: protocol::CallActionBody,
) {
    let mut h = host.borrow_mut();
    let Some((module_key, ())) = h
        .registry
        .find_action(&call.plugin_instance, &call.module, &call.action)
    else {
        tracing::warn!(
            plugin_instance = call.plugin_instance,
            module = call.module,
            action = call.action,
            "call_action: no such action"
        );
        return;
    };
    let Some(registry_key) = h.action_callbacks.get(&(module_key, call.action.clone())).cloned() else {
        tracing::warn!(
            plugin_instance = call.plugin_instance,
            module = call.module,
            action = call.action,
            "call_action: action registered without a callback"
        );
        return;
    };
    drop(h);
    let scope = format!("{}::{}::{}", call.plugin_instance, call.module, call.action);
    script::invoke_callback(lua, scheduler, registry_key, scope, ());
}

async fn write_text<S>(write: &mut SplitSink<WebSocketStream<S>, Message>, text: String) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    fn frames(
        texts: Vec<&str>,
    ) -> impl futures_util::Stream<Item = Result<Message, async_tungstenite::tungstenite::Error>> + Unpin
    {
        stream::iter(texts.into_iter().map(|t| Ok(Message::Text(t.to_string()))))
    }

    /// §8 scenario S4: wrong password is rejected with `auth`.
    #[test]
    fn wrong_password_is_rejected() {
        let mut ws = frames(vec!["Password wrong"]);
        let result = futures_lite::future::block_on(authenticate(
            &mut ws,
            Some("correct"),
            Duration::from_millis(50),
        ));
        let err = result.unwrap_err();
        assert_eq!(err.ws_close_reason(), Some("auth"));
    }

    /// No password configured at all still rejects, rather than treating a
    /// missing config value as "anything goes" (§4.6).
    #[test]
    fn missing_configured_password_rejects_every_attempt() {
        let mut ws = frames(vec!["Password anything"]);
        let result =
            futures_lite::future::block_on(authenticate(&mut ws, None, Duration::from_millis(50)));
        assert_eq!(result.unwrap_err().ws_close_reason(), Some("auth"));
    }

    #[test]
    fn correct_password_authenticates() {
        let mut ws = frames(vec!["Password correct"]);
        let result = futures_lite::future::block_on(authenticate(
            &mut ws,
            Some("correct"),
            Duration::from_millis(50),
        ));
        assert!(result.is_ok());
    }

    /// A stray `"ping"` before the password frame does not fail the
    /// handshake (§4.6 "The client may also send `ping`").
    #[test]
    fn stray_ping_before_password_is_ignored() {
        let mut ws = frames(vec!["\"ping\"", "Password correct"]);
        let result = futures_lite::future::block_on(authenticate(
            &mut ws,
            Some("correct"),
            Duration::from_millis(50),
        ));
        assert!(result.is_ok());
    }

    /// No frame at all before the timeout elapses closes with
    /// `auth_timeout` (§4.6, §8 scenario S4's sibling).
    #[test]
    fn silence_past_the_deadline_times_out() {
        let mut ws = stream::pending::<Result<Message, async_tungstenite::tungstenite::Error>>();
        let result = futures_lite::future::block_on(authenticate(
            &mut ws,
            Some("correct"),
            Duration::from_millis(20),
        ));
        assert_eq!(result.unwrap_err().ws_close_reason(), Some("auth_timeout"));
    }
}

async fn close<S>(write: &mut SplitSink<WebSocketStream<S>, Message>, reason: &str) -> Result<(), ()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    use async_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use async_tungstenite::tungstenite::protocol::CloseFrame;
    write
        .send(Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_string().into(),
        })))
        .await
        .map_err(|_| ())
}
