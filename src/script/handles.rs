//! Lua-visible capability handles (§3, §4.4). Each wraps a generational key
//! into one of the host's slabs plus a clone of the shared [`Host`] handle,
//! so a method call is always "look the key up again, fail soft if it's
//! gone" rather than holding a live reference across the Lua boundary.
//!
//! A handle outliving the thing it names (its plugin instance was
//! unregistered, its window was unclaimed) is not a bug: the slab's
//! generation check simply makes every further method call on it return
//! `nil`, exactly like any other stale-handle lookup (§9).

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{UserData, UserDataMethods};

use crate::state::Host;
use crate::wm::geometry::{Margins, MinGeometry, Size};
use crate::wm::window::{PrimaryDemotionAction, WindowKey};

pub type PluginInstanceKey = crate::slab::Key;
pub type StoreKey = crate::slab::Key;
pub type SubscriptionKey = crate::slab::Key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleKey {
    pub instance: PluginInstanceKey,
    pub index: usize,
}

#[derive(Clone)]
pub struct PluginInstanceHandle {
    pub key: PluginInstanceKey,
    pub host: Rc<RefCell<Host>>,
}

impl UserData for PluginInstanceHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("name", |_, this, ()| {
            Ok(this.host.borrow().registry.instance_name(this.key))
        });

        methods.add_method("register_module", |_, this, name: String| {
            let module = this
                .host
                .borrow_mut()
                .registry
                .register_module(this.key, &name);
            match module {
                Ok(key) => Ok(Some(ModuleHandle {
                    key,
                    host: this.host.clone(),
                })),
                Err(err) => {
                    tracing::warn!(%err, "register_module failed");
                    Ok(None)
                }
            }
        });

        methods.add_method(
            "spawn_process",
            |lua, this, (cmd, opts): (String, Option<mlua::Table>)| {
                let args = opts
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<Vec<String>>>("args").ok().flatten())
                    .unwrap_or_default();
                let envs = opts
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<mlua::Table>>("envs").ok().flatten())
                    .map(|t| t.pairs::<String, String>().filter_map(Result::ok).collect())
                    .unwrap_or_default();
                let on_output: Option<mlua::Function> = opts
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<mlua::Function>>("on_output").ok().flatten());

                let options = crate::process::SpawnOptions { args, envs };
                let mut host = this.host.borrow_mut();
                match host.spawn_process(this.key, &cmd, options) {
                    Ok(key) => {
                        if let Some(callback) = on_output {
                            if let Ok(registry_key) = lua.create_registry_value(callback) {
                                host.output_callbacks.insert(key, std::rc::Rc::new(registry_key));
                            }
                        }
                        Ok(Some(ProcessHandle {
                            key,
                            host: this.host.clone(),
                        }))
                    }
                    Err(err) => {
                        tracing::warn!(%err, "spawn_process failed");
                        Ok(None)
                    }
                }
            },
        );

        methods.add_method(
            "create_virtual_window",
            |lua, this, (name, opts): (String, mlua::Table)| {
                let min_geometry = opts
                    .get::<_, Option<String>>("min_geometry")?
                    .and_then(|s| MinGeometry::parse(&s))
                    .unwrap_or_else(MinGeometry::default_min);
                let policy = match opts
                    .get::<_, Option<String>>("primary_demotion_action")?
                    .as_deref()
                {
                    Some("make_min") => PrimaryDemotionAction::MakeMin,
                    Some("hide") => PrimaryDemotionAction::Hide,
                    _ => PrimaryDemotionAction::DoNothing,
                };

                let sink_table = lua.create_table()?;
                sink_table.set("set_geometry", opts.get::<_, mlua::Function>("set_geometry")?)?;
                sink_table.set("map", opts.get::<_, mlua::Function>("map")?)?;
                sink_table.set("unmap", opts.get::<_, mlua::Function>("unmap")?)?;
                let key = lua.create_registry_value(sink_table)?;
                let sink = Box::new(crate::script::LuaVirtualWindowSink {
                    lua: lua.clone(),
                    callbacks: Rc::new(key),
                });
                let window = this
                    .host
                    .borrow_mut()
                    .wm
                    .create_virtual_window(this.key, sink, min_geometry, policy);
                tracing::debug!(virtual_window = %name, "created virtual window");
                Ok(WindowHandle {
                    key: window,
                    host: this.host.clone(),
                })
            },
        );

        methods.add_async_method(
            "claim_window",
            |_, this, (class_substring, options): (String, Option<mlua::Table>)| async move {
                let min_geometry = options
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<String>>("min_geometry").ok().flatten())
                    .and_then(|s| MinGeometry::parse(&s))
                    .unwrap_or_else(MinGeometry::default_min);
                let timeout = options
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<u64>>("timeout_ms").ok().flatten())
                    .map(std::time::Duration::from_millis)
                    .unwrap_or(crate::script::DEFAULT_CLAIM_TIMEOUT);
                let ignore_managed = options
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<bool>>("ignore_managed").ok().flatten())
                    .unwrap_or(false);
                let handle = crate::script::claim_window(
                    this.host.clone(),
                    this.key,
                    class_substring,
                    min_geometry,
                    timeout,
                    ignore_managed,
                )
                .await;
                Ok(handle)
            },
        );

        methods.add_method("log_debug", |_, this, msg: String| {
            tracing::debug!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_info", |_, this, msg: String| {
            tracing::info!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_warn", |_, this, msg: String| {
            tracing::warn!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_error", |_, this, msg: String| {
            tracing::error!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
    }
}

impl PluginInstanceHandle {
    fn scope_label(&self) -> String {
        self.host
            .borrow()
            .registry
            .instance_name(self.key)
            .unwrap_or_else(|| "<stale plugin instance>".into())
    }
}

#[derive(Clone)]
pub struct ModuleHandle {
    pub key: ModuleKey,
    pub host: Rc<RefCell<Host>>,
}

impl UserData for ModuleHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "register_action",
            |lua, this, (name, callback, opts): (String, mlua::Function, Option<mlua::Table>)| {
                let display_name = opts
                    .as_ref()
                    .and_then(|t| t.get::<_, Option<String>>("display_name").ok().flatten());
                let mut host = this.host.borrow_mut();
                let result = host.registry.register_action(this.key, &name, display_name);
                let ok = result.is_ok();
                if let Err(err) = &result {
                    tracing::warn!(%err, "register_action failed");
                }
                if ok {
                    if let Ok(registry_key) = lua.create_registry_value(callback) {
                        host.action_callbacks.insert((this.key, name), std::rc::Rc::new(registry_key));
                    }
                }
                Ok(ok)
            },
        );

        methods.add_method("set_status", |_, this, status: Option<String>| {
            this.host.borrow_mut().registry.set_status(this.key, status);
            Ok(())
        });

        methods.add_method("get_status", |_, this, ()| {
            Ok(this.host.borrow().registry.get_status(this.key))
        });

        methods.add_method("set_message", |_, this, message: Option<String>| {
            this.host.borrow_mut().registry.set_message(this.key, message);
            Ok(())
        });

        methods.add_method("set_active_actions", |_, this, actions: Vec<String>| {
            this.host
                .borrow_mut()
                .registry
                .set_active_actions(this.key, actions);
            Ok(())
        });

        methods.add_method("log_debug", |_, this, msg: String| {
            tracing::debug!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_info", |_, this, msg: String| {
            tracing::info!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_warn", |_, this, msg: String| {
            tracing::warn!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
        methods.add_method("log_error", |_, this, msg: String| {
            tracing::error!(scope = %this.scope_label(), "{msg}");
            Ok(())
        });
    }
}

impl ModuleHandle {
    /// `plugin_instance::module`, the scope label used for script error
    /// logging (§4.4, §7 `ScriptError`).
    fn scope_label(&self) -> String {
        let host = self.host.borrow();
        let instance = host
            .registry
            .instance_name(self.key.instance)
            .unwrap_or_else(|| "<stale>".into());
        drop(host);
        format!("{instance}::{}", self.module_name())
    }

    fn module_name(&self) -> String {
        self.host
            .borrow()
            .registry
            .module_name(self.key)
            .unwrap_or_else(|| "<stale module>".into())
    }
}

#[derive(Clone)]
pub struct ProcessHandle {
    pub key: crate::process::ProcessKey,
    pub host: Rc<RefCell<Host>>,
}

impl UserData for ProcessHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("write", |_, this, bytes: mlua::String| {
            this.host
                .borrow_mut()
                .processes
                .write(this.key, bytes.as_bytes())
                .map_err(|err| mlua::Error::RuntimeError(err.to_string()))
        });

        methods.add_method("writeln", |_, this, line: String| {
            this.host
                .borrow_mut()
                .processes
                .writeln(this.key, &line)
                .map_err(|err| mlua::Error::RuntimeError(err.to_string()))
        });

        methods.add_method("kill", |_, this, ()| {
            this.host.borrow_mut().processes.kill(this.key);
            Ok(())
        });

        methods.add_method("is_alive", |_, this, ()| {
            Ok(this.host.borrow().processes.is_alive(this.key))
        });
    }
}

#[derive(Clone)]
pub struct WindowHandle {
    pub key: WindowKey,
    pub host: Rc<RefCell<Host>>,
}

impl UserData for WindowHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method(
            "max",
            |_, this, (width, height, margins): (u32, u32, Option<mlua::Table>)| {
                let margins = margins
                    .map(|t| Margins {
                        top: t.get("top").unwrap_or(0),
                        right: t.get("right").unwrap_or(0),
                        bottom: t.get("bottom").unwrap_or(0),
                        left: t.get("left").unwrap_or(0),
                    })
                    .unwrap_or_default();
                let mut host = this.host.borrow_mut();
                let effects = host.wm.max(this.key, Size { width, height }, margins);
                host.apply_effects(effects);
                Ok(())
            },
        );

        methods.add_method("min", |_, this, ()| {
            let mut host = this.host.borrow_mut();
            let effects = host.wm.min(this.key);
            host.apply_effects(effects);
            Ok(())
        });

        methods.add_method("hide", |_, this, ()| {
            let mut host = this.host.borrow_mut();
            let effects = host.wm.hide(this.key);
            host.apply_effects(effects);
            Ok(())
        });

        methods.add_method("unclaim", |_, this, ()| {
            let mut host = this.host.borrow_mut();
            let effects = host.wm.unclaim(this.key);
            host.apply_effects(effects);
            Ok(())
        });

        methods.add_method("is_primary_window", |_, this, ()| {
            Ok(this.host.borrow().wm.is_primary(this.key))
        });
    }
}

#[derive(Clone)]
pub struct StoreHandle {
    pub key: StoreKey,
    pub host: Rc<RefCell<Host>>,
}

impl UserData for StoreHandle {
    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_method("get", |lua, this, ()| {
            match this.host.borrow().registry.store_get(this.key) {
                Some(value) => lua.to_value(&value),
                None => Ok(mlua::Value::Nil),
            }
        });

        methods.add_method("set", |lua, this, value: mlua::Value| {
            let value: serde_json::Value = lua.from_value(value)?;
            this.host.borrow_mut().registry.store_set(this.key, value);
            Ok(())
        });

        methods.add_method("subscribe", |lua, this, callback: mlua::Function| {
            let registry_key = std::rc::Rc::new(lua.create_registry_value(callback)?);
            let lua = lua.clone();
            let subscription = this.host.borrow_mut().registry.store_subscribe(
                this.key,
                Box::new(move |value| {
                    let Ok(func) = lua.registry_value::<mlua::Function>(&registry_key) else {
                        return;
                    };
                    let Ok(value) = lua.to_value(value) else { return };
                    if let Err(err) = func.call::<_, ()>(value) {
                        tracing::error!(%err, "store subscriber callback error");
                    }
                }),
            );
            Ok(subscription)
        });

        methods.add_method("unsubscribe", |_, this, subscription: SubscriptionKey| {
            this.host
                .borrow_mut()
                .registry
                .store_unsubscribe(this.key, subscription);
            Ok(())
        });
    }
}
