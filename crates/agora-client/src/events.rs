//! Read-model change listeners for the presentation layer.

/// Callback invoked with the updated read model.
pub type Listener<T> = Box<dyn FnMut(&T) + Send>;

/// Returned on registration; pass it back to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An ordered set of listeners for one read model.
pub struct Listeners<T> {
    next_id: u64,
    entries: Vec<(ListenerId, Listener<T>)>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: Listener<T>) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.entries.push((id, listener));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Call every listener, in registration order.
    pub fn notify(&mut self, value: &T) {
        for (_, listener) in self.entries.iter_mut() {
            listener(value);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_notify_in_order_and_remove() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners: Listeners<u32> = Listeners::new();

        let a = seen.clone();
        let first = listeners.add(Box::new(move |v| a.lock().unwrap().push(("first", *v))));
        let b = seen.clone();
        listeners.add(Box::new(move |v| b.lock().unwrap().push(("second", *v))));

        listeners.notify(&1);
        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));
        listeners.notify(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 1), ("second", 1), ("second", 2)]
        );
        assert_eq!(listeners.len(), 1);
    }
}
