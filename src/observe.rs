//! Minimal observable-value seam toward a property/binding layer.
//!
//! Each value carries a fixed name and notifies subscribers exactly when the
//! stored value changes, never on internal recomputation that leaves it
//! unchanged.

/// Handle returned by [`ObservableValue::subscribe`], used to unsubscribe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener<T> = Box<dyn FnMut(&T)>;

pub struct ObservableValue<T> {
    name: &'static str,
    value: T,
    listeners: Vec<(ListenerId, Listener<T>)>,
    next_id: u64,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservableValue")
            .field("name", &self.name)
            .field("value", &self.value)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<T: PartialEq + Clone> ObservableValue<T> {
    pub fn new(name: &'static str, initial: T) -> Self {
        Self {
            name,
            value: initial,
            listeners: Vec::new(),
            next_id: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self) -> T {
        self.value.clone()
    }

    /// Store `value`, notifying subscribers only when it differs from the
    /// current one. Returns whether a change was observed.
    pub fn set(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        self.value = value;
        for (_, listener) in &mut self.listeners {
            listener(&self.value);
        }
        true
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&T) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a subscriber. Unknown ids are a silent no-op.
    pub fn unsubscribe(&mut self, id: ListenerId) {
        self.listeners.retain(|(lid, _)| *lid != id);
    }
}
