//! C7 — process entry point (§4.1, §6.1, §6.2, SPEC_FULL.md "Configuration
//! & bootstrap"). Wires the calloop event loop to the X connection, the
//! process supervisor's line-event channel, the admin websocket server, and
//! the Lua channel script, then runs until SIGINT/SIGTERM or a fatal X
//! error (§4.1 "Cancellation", §7 `XFatal`).

mod admin;
mod channel;
mod config;
mod deferred;
mod error;
mod process;
mod registry;
mod script;
mod slab;
mod state;
mod wm;

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use calloop::generic::Generic;
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::{EventLoop, Interest, LoopHandle, Mode, PostAction};
use clap::Parser;

use crate::config::Cli;
use crate::process::ProcessEvent;
use crate::state::{CalloopData, Host, State};
use crate::wm::connection::XConnection;

/// `Generic` needs `AsRawFd`; the X connection only hands us a bare
/// [`RawFd`], so it is wrapped rather than adopting ownership semantics it
/// does not have (the connection itself still owns and closes the socket).
struct BorrowedRawFd(RawFd);

impl std::os::fd::AsRawFd for BorrowedRawFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let channel = config::resolve_channel(&cli)?;
    let channel_home = config::resolve_channel_home(&cli, channel)?;

    let _tracing_guard = config::init_tracing(&channel_home)?;
    tracing::info!(
        channel = channel.number(),
        home = %channel_home.display(),
        "starting neopult"
    );

    let mut event_loop: EventLoop<'static, CalloopData> = EventLoop::try_new()?;
    let loop_handle = event_loop.handle();
    let loop_signal = event_loop.get_signal();

    // C3 — become the window manager for the channel's X display before
    // anything else; failure here is fatal (§4.3, §6.5, §7 `XFatal`).
    let xconn = XConnection::connect()?;
    let xconn_fd = xconn.file_descriptor();
    let default_root_size = xconn.default_root_size();

    let (process_tx, process_rx) = calloop::channel::channel::<ProcessEvent>();
    let (executor, scheduler) = calloop::futures::executor::<()>()?;
    loop_handle
        .insert_source(executor, |_, _, _| {})
        .map_err(|err| anyhow::anyhow!("failed to install futures executor: {err}"))?;

    let lua = mlua::Lua::new();

    let host = Rc::new(RefCell::new(Host::new(
        channel,
        channel_home.clone(),
        default_root_size,
        Some(xconn),
        process_tx,
        scheduler.clone(),
        loop_handle.clone(),
    )));

    let x_fatal = Rc::new(Cell::new(false));

    install_process_event_source(&loop_handle, process_rx, host.clone(), lua.clone(), scheduler.clone())?;
    install_x_event_source(&loop_handle, xconn_fd, host.clone(), x_fatal.clone())?;
    install_claim_expiry_timer(&loop_handle, host.clone());
    install_signal_source(&loop_handle, loop_signal.clone())?;

    // §4.4 "Errors raised during the initial script load are fatal" — the
    // API table must exist first, but the admin server (which needs the
    // script-set password) must wait until after load (§4.6, §5 "The
    // config's `websocket_password` is set once... and read thereafter").
    script::install_api(&lua, host.clone(), channel, channel_home.clone(), None)?;
    config::load_channel_script(&lua, &channel_home)?;

    let websocket_password = read_websocket_password(&lua)?;
    let observer = admin::start(
        &scheduler,
        host.clone(),
        lua.clone(),
        channel,
        websocket_password,
        admin::AdminConfig::default(),
    );
    host.borrow_mut().registry.add_observer(Box::new(observer));

    let mut data = CalloopData {
        state: State {
            loop_handle: loop_handle.clone(),
            loop_signal,
            lua,
            host: host.clone(),
        },
    };

    event_loop.run(None, &mut data, |_data| {})?;

    // §4.1 shutdown ordering: plugin `on_cleanup` callbacks run with child
    // processes still alive, then every surviving process is killed.
    data.state.shutdown();

    if x_fatal.get() {
        tracing::error!("exiting after fatal X error");
        std::process::exit(1);
    }

    Ok(())
}

fn read_websocket_password(lua: &mlua::Lua) -> anyhow::Result<Option<String>> {
    let neopult: mlua::Table = lua.globals().get("neopult")?;
    let config: mlua::Table = neopult.get("config")?;
    Ok(config.get("websocket_password")?)
}

fn install_process_event_source(
    loop_handle: &LoopHandle<'static, CalloopData>,
    process_rx: calloop::channel::Channel<ProcessEvent>,
    host: Rc<RefCell<Host>>,
    lua: mlua::Lua,
    scheduler: calloop::futures::Scheduler<()>,
) -> anyhow::Result<()> {
    loop_handle
        .insert_source(process_rx, move |event, _, _data| {
            let calloop::channel::Event::Msg(event) = event else {
                return;
            };
            handle_process_event(&host, &lua, &scheduler, event);
        })
        .map_err(|err| anyhow::anyhow!("failed to install process event source: {err}"))?;
    Ok(())
}

/// Routes a decoded process line to the owning plugin instance's
/// `on_output` callback (§4.2, §6.4). Dispatched via `call_async` so a
/// handler that itself calls `claim_window` suspends cooperatively rather
/// than needing a synchronous stack.
fn handle_process_event(
    host: &Rc<RefCell<Host>>,
    lua: &mlua::Lua,
    scheduler: &calloop::futures::Scheduler<()>,
    event: ProcessEvent,
) {
    match event {
        ProcessEvent::Line { process, line, .. } => {
            let (callback, scope) = {
                let h = host.borrow();
                let callback = h.output_callbacks.get(&process).cloned();
                let scope = h
                    .output_router
                    .owner(process)
                    .and_then(|owner| h.registry.instance_name(owner))
                    .unwrap_or_else(|| "<unknown plugin instance>".into());
                (callback, scope)
            };
            if let Some(callback) = callback {
                script::invoke_callback(lua, scheduler, callback, scope, line);
            }
        }
        ProcessEvent::Exited { process } => {
            let mut h = host.borrow_mut();
            h.processes.mark_exited(process);
            h.output_router.unregister(process);
        }
    }
}

fn install_x_event_source(
    loop_handle: &LoopHandle<'static, CalloopData>,
    xconn_fd: RawFd,
    host: Rc<RefCell<Host>>,
    x_fatal: Rc<Cell<bool>>,
) -> anyhow::Result<()> {
    loop_handle
        .insert_source(
            Generic::new(BorrowedRawFd(xconn_fd), Interest::READ, Mode::Level),
            move |_, _, _data: &mut CalloopData| {
                if let Err(err) = pump_x_events(&host) {
                    let err = crate::error::CoreError::XFatal(err.to_string());
                    tracing::error!(%err, "fatal X connection error");
                    x_fatal.set(true);
                    return Ok(PostAction::Remove);
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| anyhow::anyhow!("failed to install X event source: {err}"))?;
    Ok(())
}

/// Drains pending X events and feeds newly-observed top-level windows
/// through [`crate::wm::WindowManager::observe_window`], resolving any
/// `claim_window` suspensions the new window satisfies (§4.3.1, §4.3.5,
/// §6.5). Loss of the X connection is the one fatal error category in this
/// process (§7 `XFatal`).
fn pump_x_events(host: &Rc<RefCell<Host>>) -> anyhow::Result<()> {
    let events = {
        let h = host.borrow();
        let Some(xconn) = h.xconn.as_ref() else {
            return Ok(());
        };
        xconn.poll_events()?
    };

    for event in events {
        use x11rb::protocol::Event;
        match event {
            Event::CreateNotify(ev) => observe(host, ev.window),
            Event::MapRequest(ev) => observe(host, ev.window),
            Event::PropertyNotify(ev) => observe(host, ev.window),
            Event::DestroyNotify(ev) => {
                // The underlying X window is gone; reconcile both the
                // unmanaged-discovery list and (if it had been claimed) the
                // management table, so invariant 3 (§3) keeps holding.
                let mut h = host.borrow_mut();
                h.wm.forget_unmanaged(ev.window);
                if let Some(key) = h.wm.find_real_by_xid(ev.window) {
                    let effects = h.wm.unclaim(key);
                    h.apply_effects(effects);
                }
            }
            Event::UnmapNotify(_) => {
                // Unmaps of managed windows are driven by our own
                // `Effect::UnmapReal`; an externally-initiated unmap of an
                // unmanaged window just means it is no longer a claim
                // candidate until mapped again, which `observe` will
                // naturally re-discover via a later `MapRequest`.
            }
            _ => {}
        }
    }
    Ok(())
}

/// Queries `WM_CLASS` for a newly-seen top-level window and feeds it to the
/// window manager; windows without a resolved `WM_CLASS` yet (the property
/// has not been set) are silently skipped and picked up on a later
/// `PropertyNotify` (§4.3.1).
fn observe(host: &Rc<RefCell<Host>>, xid: u32) {
    let resolved = {
        let h = host.borrow();
        let Some(xconn) = h.xconn.as_ref() else {
            return;
        };
        let Ok(Some(wm_class)) = xconn.query_wm_class(xid) else {
            return;
        };
        drop(h);
        host.borrow_mut().wm.observe_window(xid, wm_class)
    };

    let mut h = host.borrow_mut();
    for (claim_id, window, _owner, effects) in resolved {
        if let Some(tx) = h.claim_waiters.remove(&claim_id) {
            let _ = tx.send(Some((window, effects)));
        } else {
            h.apply_effects(effects);
        }
    }
}

/// Periodically expires `claim_window` suspensions past their deadline
/// (§4.3.1, §5 "Cancellation and timeouts"). The window manager itself has
/// no notion of wall-clock time; this is the loop's only polling-driven
/// concern; resolving a *satisfied* claim happens immediately from
/// [`observe`] instead of waiting for this tick.
fn install_claim_expiry_timer(loop_handle: &LoopHandle<'static, CalloopData>, host: Rc<RefCell<Host>>) {
    const INTERVAL: Duration = Duration::from_millis(50);
    let timer = Timer::from_duration(INTERVAL);
    let _ = loop_handle.insert_source(timer, move |_, _, _data| {
        host.borrow_mut().expire_claims();
        TimeoutAction::ToDuration(INTERVAL)
    });
}

/// SIGINT/SIGTERM stop the loop cleanly; `State::shutdown` (run by `main`
/// after `event_loop.run` returns) then runs `on_cleanup` and kills every
/// surviving process (§4.1).
fn install_signal_source(
    loop_handle: &LoopHandle<'static, CalloopData>,
    loop_signal: calloop::LoopSignal,
) -> anyhow::Result<()> {
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])
        .map_err(|err| anyhow::anyhow!("failed to install signal handler: {err}"))?;
    loop_handle
        .insert_source(signals, move |_, _, _data| {
            loop_signal.stop();
        })
        .map_err(|err| anyhow::anyhow!("failed to install signal source: {err}"))?;
    Ok(())
}
