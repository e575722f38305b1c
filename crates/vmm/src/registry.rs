#![forbid(unsafe_code)]

use crate::plugin::{Capabilities, Module, Registration, Scope, TimelineInfo};
use parking_lot::{Mutex, MutexGuard};
use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use tracing::{debug, warn};

new_key_type! { pub struct ModuleId; }

/// Lifecycle of a registered module. Unregistered modules have no slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Registered,
    Active,
    Closed,
}

pub struct ModuleSlot {
    pub name: String,
    pub scope: Scope,
    pub capabilities: Capabilities,
    pub timeline: Option<TimelineInfo>,
    state: ModuleState,
    module: Mutex<Box<dyn Module>>,
}

impl ModuleSlot {
    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ModuleState::Active
    }

    pub fn has(&self, capability: Capabilities) -> bool {
        self.capabilities.contains(capability)
    }

    /// Serializes calls into the module.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Module>> {
        self.module.lock()
    }

    fn listed_in(&self, process: bool) -> bool {
        if process {
            self.scope.contains(Scope::PROCESS) && !self.scope.contains(Scope::PROCESS_HIDDEN)
        } else {
            self.scope.contains(Scope::ROOT) && !self.scope.contains(Scope::ROOT_HIDDEN)
        }
    }

    fn reachable_in(&self, process: bool) -> bool {
        self.scope.contains(if process { Scope::PROCESS } else { Scope::ROOT })
    }
}

#[derive(Default)]
pub struct Registry {
    slots: SlotMap<ModuleId, ModuleSlot>,
    order: Vec<ModuleId>,
    by_name: HashMap<String, ModuleId>,
}

impl Registry {
    /// Add a module in the registered state. Names are unique,
    /// case-insensitively.
    pub fn register(&mut self, registration: Registration) -> Option<ModuleId> {
        let key = registration.name.to_ascii_lowercase();
        if self.by_name.contains_key(&key) {
            warn!(name = %registration.name, "duplicate module name ignored");
            return None;
        }
        let capabilities = registration.module.capabilities();
        let id = self.slots.insert(ModuleSlot {
            name: registration.name,
            scope: registration.scope,
            capabilities,
            timeline: registration.timeline,
            state: ModuleState::Registered,
            module: Mutex::new(registration.module),
        });
        self.order.push(id);
        self.by_name.insert(key, id);
        debug!(name = %self.slots[id].name, ?capabilities, "module registered");
        Some(id)
    }

    /// Registered → Active.
    pub fn activate_all(&mut self) -> usize {
        let mut n = 0;
        for slot in self.slots.values_mut() {
            if slot.state == ModuleState::Registered {
                slot.state = ModuleState::Active;
                n += 1;
            }
        }
        n
    }

    /// Call `close` once on every module that is not closed yet.
    pub fn close_all(&mut self) -> usize {
        let mut n = 0;
        for id in &self.order {
            let Some(slot) = self.slots.get_mut(*id) else {
                continue;
            };
            if slot.state == ModuleState::Closed {
                continue;
            }
            if slot.capabilities.contains(Capabilities::CLOSE) {
                slot.module.get_mut().close();
            }
            slot.state = ModuleState::Closed;
            n += 1;
        }
        debug!(closed = n, "modules closed");
        n
    }

    pub fn get(&self, id: ModuleId) -> Option<&ModuleSlot> {
        self.slots.get(id)
    }

    /// Active module reachable under the root (`process == false`) or a
    /// process directory.
    pub fn find(&self, name: &str, process: bool) -> Option<&ModuleSlot> {
        let id = self.by_name.get(&name.to_ascii_lowercase())?;
        self.slots
            .get(*id)
            .filter(|slot| slot.is_active() && slot.reachable_in(process))
    }

    /// Active, non-hidden modules of a directory, in registration order.
    pub fn listed(&self, process: bool) -> impl Iterator<Item = &ModuleSlot> {
        self.active().filter(move |slot| slot.listed_in(process))
    }

    pub fn active(&self) -> impl Iterator<Item = &ModuleSlot> {
        self.order
            .iter()
            .filter_map(|id| self.slots.get(*id))
            .filter(|slot| slot.is_active())
    }

    pub fn with_capability(&self, capability: Capabilities) -> impl Iterator<Item = &ModuleSlot> {
        self.active().filter(move |slot| slot.has(capability))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
