//! C1 — the host state every mutation in the process funnels through. This
//! crate has no analogue of the teacher's `Space`/render pipeline: its
//! single-threaded "scene graph" is `Host` (registry + window manager +
//! process table), and instead of rendering frames it applies WM [`Effect`]s
//! to the X connection (or the deferred queue, for virtual windows).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use calloop::futures::Scheduler;
use calloop::{LoopHandle, LoopSignal};

use crate::channel::Channel;
use crate::deferred::DeferredQueue;
use crate::error::CoreError;
use crate::process::{OutputRouter, ProcessEvent, ProcessKey, ProcessSupervisor, SpawnOptions};
use crate::registry::Registry;
use crate::script::handles::{ModuleKey, PluginInstanceKey};
use crate::wm::connection::XConnection;
use crate::wm::window::WindowKey;
use crate::wm::{Effect, PendingClaimId, WindowManager};

/// What an expired or satisfied `claim_window` suspension resolves to:
/// `Some` with the claimed window and the WM effects that placing it
/// produced, or `None` on timeout (§4.3.1, §8 property 8).
pub type ClaimResolution = Option<(WindowKey, Vec<Effect>)>;

/// The single owner of every piece of host-mutable state: the registry
/// (C5), the window manager (C3), the process table (C2), the deferred
/// queue (C1), and the bookkeeping that ties Lua callbacks to the host
/// objects that invoke them. Scripting handles (`script::handles`) each
/// hold an `Rc<RefCell<Host>>` rather than borrowing it, so a method call
/// is always "reacquire, mutate, release" — never a borrow held across a
/// Lua re-entrant call (§3 invariant 5, §4.3.5).
pub struct Host {
    pub registry: Registry,
    pub wm: WindowManager,
    pub processes: ProcessSupervisor,
    pub output_router: OutputRouter,
    pub deferred: DeferredQueue,

    /// `on_output` callbacks, keyed by the process they were registered
    /// for (§4.2, §6.4). Kept out of `process::ProcessSupervisor` so that
    /// module stays ignorant of Lua, matching `registry`'s own
    /// script-agnostic design.
    pub output_callbacks: HashMap<ProcessKey, Rc<mlua::RegistryKey>>,
    /// `register_action` callbacks, keyed by the module and action name
    /// they belong to (§4.6 "Requests", §6.4).
    pub action_callbacks: HashMap<(ModuleKey, String), Rc<mlua::RegistryKey>>,
    /// `on_cleanup` callbacks, run in registration order at shutdown before
    /// child processes are killed (§4.1, §3 "Plugin instance").
    pub cleanup_callbacks: Vec<(PluginInstanceKey, Rc<mlua::RegistryKey>)>,
    /// Suspended `claim_window` calls waiting on either a matching window
    /// or their timeout (§4.3.1).
    pub claim_waiters: HashMap<PendingClaimId, futures_channel::oneshot::Sender<ClaimResolution>>,

    /// `None` only in tests that exercise `Host` without a live X
    /// connection; always `Some` once `main` has connected (§4.3, §6.5).
    pub xconn: Option<XConnection>,

    process_sender: calloop::channel::Sender<ProcessEvent>,
    scheduler: Scheduler<()>,

    pub channel: Channel,
    pub channel_home: std::path::PathBuf,
}

impl Host {
    pub fn new(
        channel: Channel,
        channel_home: std::path::PathBuf,
        default_root_size: crate::wm::geometry::Size,
        xconn: Option<XConnection>,
        process_sender: calloop::channel::Sender<ProcessEvent>,
        scheduler: Scheduler<()>,
        loop_handle: LoopHandle<'static, CalloopData>,
    ) -> Self {
        Self {
            registry: Registry::new(),
            wm: WindowManager::new(default_root_size),
            processes: ProcessSupervisor::new(),
            output_router: OutputRouter::default(),
            deferred: DeferredQueue::new(loop_handle),
            output_callbacks: HashMap::new(),
            action_callbacks: HashMap::new(),
            cleanup_callbacks: Vec::new(),
            claim_waiters: HashMap::new(),
            xconn,
            process_sender,
            scheduler,
            channel,
            channel_home,
        }
    }

    /// Spawns a child owned by `owner` (§3 invariant 2, §4.2).
    pub fn spawn_process(
        &mut self,
        owner: PluginInstanceKey,
        cmd: &str,
        options: SpawnOptions,
    ) -> Result<ProcessKey, CoreError> {
        let key = self
            .processes
            .spawn(cmd, options, self.process_sender.clone(), &self.scheduler)?;
        self.output_router.register(key, owner);
        Ok(key)
    }

    /// Applies a batch of WM effects: real-window effects hit the X
    /// connection synchronously (X cannot call back into us); virtual-
    /// window effects are pushed onto the deferred queue so their sink
    /// callbacks run with the WM lock released, never reentering it from
    /// this call stack (§4.3.5, §8 scenario S3).
    pub fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match &effect {
                Effect::ConfigureReal { .. }
                | Effect::MapReal { .. }
                | Effect::UnmapReal { .. }
                | Effect::ResizeRoot { .. } => {
                    if let Some(xconn) = &self.xconn {
                        if let Err(err) = xconn.apply(std::slice::from_ref(&effect)) {
                            tracing::error!(%err, "failed to apply X effect");
                        }
                    }
                }
                Effect::VirtualSetGeometry { .. }
                | Effect::VirtualMap { .. }
                | Effect::VirtualUnmap { .. } => {
                    self.deferred.push(move |data: &mut CalloopData| {
                        data.state.host.borrow().wm.invoke_virtual_effect(&effect);
                    });
                }
            }
        }
    }

    pub fn scheduler(&self) -> &Scheduler<()> {
        &self.scheduler
    }

    /// Expires timed-out `claim_window` suspensions (§4.3.1, §5). Called
    /// from the claim-expiry timer source once per tick.
    pub fn expire_claims(&mut self) {
        let expired = self.wm.expire_pending(std::time::Instant::now());
        for (id, _owner) in expired {
            if let Some(tx) = self.claim_waiters.remove(&id) {
                let _ = tx.send(None);
            }
        }
    }
}

/// The process-wide state every calloop event source callback receives.
/// Mirrors the teacher's `CalloopData { display, state }` split: here the
/// "display" half is the X connection's event stream (owned inside
/// `Host::xconn` rather than threaded separately) and `state` is the
/// scripting/runtime half.
pub struct CalloopData {
    pub state: State,
}

/// Everything that is *not* host-mutable registry/WM/process state: the
/// event loop handles, the Lua runtime, and channel identity. Kept
/// separate from `Host` because `Host` is shared (`Rc<RefCell<_>>`) with
/// every scripting handle, while `lua` and the loop handles are only ever
/// touched from the loop's own callbacks.
pub struct State {
    pub loop_handle: LoopHandle<'static, CalloopData>,
    pub loop_signal: LoopSignal,
    pub lua: mlua::Lua,
    pub host: Rc<RefCell<Host>>,
}

impl State {
    /// Runs every plugin instance's `on_cleanup` callback, in registration
    /// order, then kills every surviving child process (§4.1 shutdown
    /// ordering, SPEC_FULL.md "Shutdown ordering").
    pub fn shutdown(&mut self) {
        let callbacks = std::mem::take(&mut self.host.borrow_mut().cleanup_callbacks);
        for (instance, registry_key) in callbacks {
            let scope = self
                .host
                .borrow()
                .registry
                .instance_name(instance)
                .unwrap_or_else(|| "<stale plugin instance>".into());
            let func: mlua::Result<mlua::Function> = self.lua.registry_value(&registry_key);
            match func {
                Ok(func) => {
                    if let Err(err) = func.call::<_, ()>(()) {
                        tracing::error!(scope, %err, "on_cleanup error");
                    }
                }
                Err(err) => tracing::warn!(scope, %err, "stale on_cleanup callback"),
            }
        }
        self.host.borrow_mut().processes.kill_all();
    }
}
