use std::sync::Mutex;

/// Identifies a registered listener so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Decision a listener returns about its own registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retain {
    Keep,
    Remove,
}

type Listener<T> = Box<dyn FnMut(&T) -> Retain + Send>;

struct Entry<T> {
    id: u64,
    listener: Listener<T>,
}

struct Registry<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
    firing: bool,
    added: Vec<Entry<T>>,
    removed: Vec<u64>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
            firing: false,
            added: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Synchronous publish/subscribe channel for one event kind.
///
/// Listeners run on the publishing task, in subscription order. A listener
/// may add or remove listeners (including itself) while a fire is in
/// progress: removals take effect within the same fire, additions from the
/// next one. Listeners must not fire the same emitter from inside their
/// callback.
pub struct Emitter<T> {
    registry: Mutex<Registry<T>>,
    fire_lock: Mutex<()>,
}

impl<T> Emitter<T> {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            fire_lock: Mutex::new(()),
        }
    }

    pub fn subscribe(&self, mut listener: impl FnMut(&T) + Send + 'static) -> Subscription {
        self.subscribe_with(move |value| {
            listener(value);
            Retain::Keep
        })
    }

    pub fn subscribe_with(
        &self,
        listener: impl FnMut(&T) -> Retain + Send + 'static,
    ) -> Subscription {
        let mut registry = self.registry.lock().unwrap();
        registry.next_id += 1;
        let id = registry.next_id;
        let entry = Entry {
            id,
            listener: Box::new(listener),
        };
        if registry.firing {
            registry.added.push(entry);
        } else {
            registry.entries.push(entry);
        }
        Subscription(id)
    }

    /// Installs a listener that runs `action` for the first value matching
    /// `matches`, then removes itself. It never runs for other values and
    /// never runs twice.
    pub fn once_when(
        &self,
        mut matches: impl FnMut(&T) -> bool + Send + 'static,
        action: impl FnOnce(&T) + Send + 'static,
    ) -> Subscription {
        let mut action = Some(action);
        self.subscribe_with(move |value| {
            if !matches(value) {
                return Retain::Keep;
            }
            if let Some(action) = action.take() {
                action(value);
            }
            Retain::Remove
        })
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut registry = self.registry.lock().unwrap();
        if registry.firing {
            registry.removed.push(subscription.0);
            registry.added.retain(|entry| entry.id != subscription.0);
        } else {
            registry.entries.retain(|entry| entry.id != subscription.0);
        }
    }

    /// Delivers `value` to every listener registered at fire time, in
    /// subscription order.
    pub fn fire(&self, value: &T) {
        let _serialized = self.fire_lock.lock().unwrap();
        let mut entries = {
            let mut registry = self.registry.lock().unwrap();
            registry.firing = true;
            std::mem::take(&mut registry.entries)
        };

        let mut kept = Vec::with_capacity(entries.len());
        for mut entry in entries.drain(..) {
            let removed_meanwhile = self
                .registry
                .lock()
                .unwrap()
                .removed
                .contains(&entry.id);
            if removed_meanwhile {
                continue;
            }
            match (entry.listener)(value) {
                Retain::Keep => kept.push(entry),
                Retain::Remove => {}
            }
        }

        let mut registry = self.registry.lock().unwrap();
        let removed = std::mem::take(&mut registry.removed);
        kept.retain(|entry| !removed.contains(&entry.id));
        let added = std::mem::take(&mut registry.added);
        registry.entries = kept;
        registry.entries.extend(added);
        registry.firing = false;
    }

    pub fn listener_count(&self) -> usize {
        let registry = self.registry.lock().unwrap();
        registry.entries.len() + registry.added.len()
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}
