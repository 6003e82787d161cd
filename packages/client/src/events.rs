use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use renderbox_models::events::ChannelEvent;

pub type ListenerCallback = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Token returned by [`EventEmitter::on`], required to unregister the
/// listener again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerId {
    name: String,
    id: usize,
}

impl ListenerId {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Name-keyed listener registry for [`ChannelEvent`]s.
///
/// Listeners are invoked synchronously, in registration order, on the
/// task that emits. Emission snapshots the registry first, so listeners
/// registered while an event is being delivered only observe subsequent
/// events.
#[derive(Default)]
pub struct EventEmitter {
    listeners: RwLock<BTreeMap<String, Vec<(usize, ListenerCallback)>>>,
    next_id: AtomicUsize,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.listeners.read().unwrap();
        f.debug_struct("EventEmitter")
            .field("events", &listeners.keys().collect::<Vec<_>>())
            .field(
                "listeners",
                &listeners.values().map(Vec::len).sum::<usize>(),
            )
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for events named `name`.
    ///
    /// Registering the same callback twice invokes it twice per event.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn on(
        &self,
        name: impl Into<String>,
        callback: impl Fn(&ChannelEvent) + Send + Sync + 'static,
    ) -> ListenerId {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.listeners
            .write()
            .unwrap()
            .entry(name.clone())
            .or_default()
            .push((id, Arc::new(callback)));

        log::trace!("on: registered listener id={id} name={name}");

        ListenerId { name, id }
    }

    /// Unregisters the listener behind `listener`.
    ///
    /// Returns whether a listener was actually removed. Unregistering
    /// twice is a no-op.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn off(&self, listener: &ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap();

        let Some(entries) = listeners.get_mut(&listener.name) else {
            return false;
        };

        let before = entries.len();
        entries.retain(|(id, _)| *id != listener.id);
        let removed = entries.len() < before;

        if entries.is_empty() {
            listeners.remove(&listener.name);
        }
        if removed {
            log::trace!("off: removed listener id={} name={}", listener.id, listener.name);
        }

        removed
    }

    /// Whether at least one listener is registered under `name`.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listeners
            .read()
            .unwrap()
            .get(name)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .read()
            .unwrap()
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every listener registered under its name.
    ///
    /// # Panics
    ///
    /// * If the internal `RwLock` is poisoned
    pub fn emit(&self, event: &ChannelEvent) {
        let name = event.name();
        let callbacks = {
            let listeners = self.listeners.read().unwrap();
            listeners
                .get(name)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(_, callback)| callback.clone())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };

        log::trace!("emit: name={name} listeners={}", callbacks.len());

        for callback in callbacks {
            callback(event);
        }
    }
}
