//! C4 — the scripting host bridge (§4.4). Installs the `neopult` global
//! table before the channel script loads, marshals host handles as opaque
//! `UserData` bearing the generational keys of [`crate::slab::Slab`], and
//! hosts the one cooperative-suspension point the API exposes:
//! `claim_window` (§4.3.1, §8 property 8's "claim" half).
//!
//! Every other script-facing operation returns immediately; only
//! `claim_window` is `add_async_method`, and only callbacks that might
//! transitively call it (action callbacks, `on_output` callbacks,
//! `on_cleanup`) are invoked with `call_async` on the calloop futures
//! executor rather than a plain synchronous `call`. Store subscribers and
//! virtual-window sink callbacks are invoked synchronously, matching their
//! stricter contracts (§3 "Store", §4.3.5).
//!
//! The channel script's top level is the one exception: `config::
//! load_channel_script` runs it with a plain synchronous `exec` before the
//! calloop loop starts, so there is no executor yet to suspend on. A
//! top-level `claim_window` call would deadlock waiting for a oneshot that
//! nothing can ever fulfill; scripts must call it only from inside a
//! callback registered after the loop is running (action callbacks,
//! `on_output`, `on_cleanup`).

pub mod handles;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use mlua::{Lua, Table};
use rand::Rng;

use crate::channel::Channel;
use crate::script::handles::{PluginInstanceHandle, PluginInstanceKey, StoreHandle, WindowHandle};
use crate::state::Host;
use crate::wm::geometry::MinGeometry;
use crate::wm::window::VirtualWindowSink;

/// §4.3.1 default claim timeout.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_millis(250);

/// Forwards `set_geometry`/`map`/`unmap` calls from the window manager to
/// the Lua callback table a script passed to `create_virtual_window`
/// (§4.3.2). Held behind `Rc<mlua::RegistryKey>` rather than cloning the
/// table eagerly, so a stale sink (its window unclaimed) still frees the
/// registry slot once the last reference drops.
pub struct LuaVirtualWindowSink {
    pub lua: Lua,
    pub callbacks: Rc<mlua::RegistryKey>,
}

impl LuaVirtualWindowSink {
    fn call0(&self, method: &str) {
        let result: mlua::Result<()> = (|| {
            let table: Table = self.lua.registry_value(&self.callbacks)?;
            let func: mlua::Function = table.get(method)?;
            func.call(())
        })();
        if let Err(err) = result {
            tracing::error!(%err, method, "virtual window callback error");
        }
    }
}

impl VirtualWindowSink for LuaVirtualWindowSink {
    fn set_geometry(&self, x: i32, y: i32, width: u32, height: u32, alignment: &str, z_index: u32) {
        let result: mlua::Result<()> = (|| {
            let table: Table = self.lua.registry_value(&self.callbacks)?;
            let func: mlua::Function = table.get("set_geometry")?;
            func.call((x, y, width, height, alignment, z_index))
        })();
        if let Err(err) = result {
            tracing::error!(%err, "virtual window set_geometry callback error");
        }
    }

    fn map(&self) {
        self.call0("map");
    }

    fn unmap(&self) {
        self.call0("unmap");
    }
}

/// The async half of `claim_window` (§4.3.1, §4.4, §8 property 8). Tries an
/// immediate claim first; on a miss, registers a pending claim with the
/// window manager and suspends on a oneshot channel that the X event
/// handler (on a match) or the claim-expiry timer (on timeout) fulfills.
/// Suspension yields to the calloop futures executor — no OS thread blocks
/// while this future is pending.
pub async fn claim_window(
    host: Rc<RefCell<Host>>,
    owner: PluginInstanceKey,
    class_substring: String,
    min_geometry: MinGeometry,
    timeout: Duration,
    ignore_managed: bool,
) -> Option<WindowHandle> {
    let immediate = host
        .borrow_mut()
        .wm
        .try_claim(owner, &class_substring, min_geometry, ignore_managed);

    if let Some((window, effects)) = immediate {
        host.borrow_mut().apply_effects(effects);
        return Some(WindowHandle {
            key: window,
            host,
        });
    }

    let (tx, rx) = futures_channel::oneshot::channel();
    let class_substring_for_log = class_substring.clone();
    {
        let mut h = host.borrow_mut();
        let deadline = std::time::Instant::now() + timeout;
        let claim_id = h.wm.register_pending(
            owner,
            class_substring,
            ignore_managed,
            min_geometry,
            deadline,
        );
        h.claim_waiters.insert(claim_id, tx);
    }

    match rx.await {
        Ok(Some((window, effects))) => {
            host.borrow_mut().apply_effects(effects);
            Some(WindowHandle {
                key: window,
                host,
            })
        }
        _ => {
            let err = crate::error::CoreError::ClaimTimeout;
            tracing::warn!(%err, class_substring = class_substring_for_log, "claim_window timed out");
            None
        }
    }
}

/// Invokes a registered Lua callback (action, `on_output` line, or
/// `on_cleanup`) via `call_async`, scheduled on the calloop futures
/// executor, so that a callback which itself calls `claim_window` suspends
/// cooperatively instead of needing a synchronous call stack. Errors are
/// caught and logged under `scope` rather than propagated (§7 `ScriptError`).
pub fn invoke_callback<A>(
    lua: &Lua,
    scheduler: &calloop::futures::Scheduler<()>,
    registry_key: Rc<mlua::RegistryKey>,
    scope: String,
    args: A,
) where
    A: for<'lua> mlua::IntoLuaMulti<'lua> + 'static,
{
    let lua = lua.clone();
    let task = async move {
        let func: mlua::Function = match lua.registry_value(&registry_key) {
            Ok(f) => f,
            Err(err) => {
                tracing::warn!(%err, scope, "stale script callback");
                return;
            }
        };
        if let Err(err) = func.call_async::<_, ()>(args).await {
            tracing::error!(scope, %err, "script callback error");
        }
    };
    let _ = scheduler.schedule(task);
}

/// Generates a cryptographically random URL-safe token of length `n`
/// (`neopult.api.generate_token`, §4.4).
fn generate_token(n: usize) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Installs the `neopult` global table (§4.4, §6.4) before the channel
/// script is loaded. Fatal on failure (§4.4 "Errors raised during the
/// initial script load are fatal" — this happens before any load).
pub fn install_api(
    lua: &Lua,
    host: Rc<RefCell<Host>>,
    channel: Channel,
    channel_home: std::path::PathBuf,
    websocket_password: Option<String>,
) -> mlua::Result<()> {
    let neopult = lua.create_table()?;

    // -- neopult.api -------------------------------------------------------

    let api = lua.create_table()?;

    {
        let host = host.clone();
        api.set(
            "register_plugin_instance",
            lua.create_function(move |lua, (name, opts): (String, Option<Table>)| {
                let key = host.borrow_mut().registry.register_plugin_instance(&name);
                let key = match key {
                    Ok(key) => key,
                    Err(err) => {
                        tracing::warn!(%err, "register_plugin_instance failed");
                        return Ok(None);
                    }
                };
                if let Some(opts) = opts {
                    if let Ok(Some(on_cleanup)) = opts.get::<_, Option<mlua::Function>>("on_cleanup")
                    {
                        if let Ok(registry_key) = lua.create_registry_value(on_cleanup) {
                            host.borrow_mut()
                                .cleanup_callbacks
                                .push((key, Rc::new(registry_key)));
                        }
                    }
                }
                Ok(Some(PluginInstanceHandle {
                    key,
                    host: host.clone(),
                }))
            })?,
        )?;
    }

    {
        let host = host.clone();
        api.set(
            "create_store",
            lua.create_function(move |lua, initial: Option<mlua::Value>| {
                let initial = match initial {
                    Some(v) => lua.from_value(v)?,
                    None => serde_json::Value::Null,
                };
                let key = host.borrow_mut().registry.create_store(initial);
                Ok(StoreHandle {
                    key,
                    host: host.clone(),
                })
            })?,
        )?;
    }

    {
        let host = host.clone();
        api.set(
            "run_later",
            lua.create_function(move |lua, task: mlua::Function| {
                let registry_key = Rc::new(lua.create_registry_value(task)?);
                let lua_for_task = lua.clone();
                host.borrow_mut().deferred.push(move |_data| {
                    if let Ok(func) = lua_for_task.registry_value::<mlua::Function>(&registry_key) {
                        if let Err(err) = func.call::<_, ()>(()) {
                            tracing::error!(%err, "run_later task error");
                        }
                    }
                });
                Ok(())
            })?,
        )?;
    }

    api.set(
        "get_channel",
        lua.create_function(move |_, ()| Ok(channel.number()))?,
    )?;

    let channel_home_string = channel_home.to_string_lossy().to_string();
    api.set(
        "get_channel_home",
        lua.create_function(move |_, ()| Ok(channel_home_string.clone()))?,
    )?;

    api.set(
        "generate_token",
        lua.create_function(move |_, n: usize| Ok(generate_token(n)))?,
    )?;

    neopult.set("api", api)?;

    // -- neopult.config ------------------------------------------------------

    let config = lua.create_table()?;
    config.set("websocket_password", websocket_password)?;
    neopult.set("config", config)?;

    // -- neopult.log -----------------------------------------------------

    let log = lua.create_table()?;
    log.set(
        "debug",
        lua.create_function(|_, msg: String| {
            tracing::debug!("{msg}");
            Ok(())
        })?,
    )?;
    log.set(
        "info",
        lua.create_function(|_, msg: String| {
            tracing::info!("{msg}");
            Ok(())
        })?,
    )?;
    log.set(
        "warn",
        lua.create_function(|_, msg: String| {
            tracing::warn!("{msg}");
            Ok(())
        })?,
    )?;
    log.set(
        "error",
        lua.create_function(|_, msg: String| {
            tracing::error!("{msg}");
            Ok(())
        })?,
    )?;
    neopult.set("log", log)?;

    lua.globals().set("neopult", neopult)?;

    Ok(())
}
