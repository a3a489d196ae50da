use std::sync::{Arc, Mutex};

/// Host-owned table mapping small integer handles to strings the module
/// registered through its string capability. A panic inside the module
/// cannot carry its payload across the boundary by value; the module parks
/// the text here and hands the harness a handle instead.
///
/// Slots are cleared as soon as they are read so the host never retains a
/// dead module's last panic value.
pub struct ForeignTable {
    slots: Mutex<Vec<Option<String>>>,
}

impl ForeignTable {
    pub fn new() -> Arc<Self> {
        Arc::new(ForeignTable {
            slots: Mutex::new(Vec::new()),
        })
    }

    /// Store a value and return its handle. Freed slots are reused.
    pub fn insert(&self, value: String) -> i32 {
        let mut slots = self.slots.lock().unwrap();
        if let Some(free) = slots.iter().position(Option::is_none) {
            slots[free] = Some(value);
            free as i32
        } else {
            slots.push(Some(value));
            (slots.len() - 1) as i32
        }
    }

    /// Read a handle's value, clearing the slot.
    pub fn take(&self, handle: i32) -> Option<String> {
        if handle < 0 {
            return None;
        }
        let mut slots = self.slots.lock().unwrap();
        slots.get_mut(handle as usize).and_then(Option::take)
    }

    /// Read a handle's value for display. A cleared or unknown handle is the
    /// literal `undefined`, never an error.
    pub fn resolve(&self, handle: i32) -> String {
        self.take(handle)
            .unwrap_or_else(|| "undefined".to_string())
    }

    /// Number of live (unread) values, used to check nothing is retained.
    pub fn live(&self) -> usize {
        self.slots
            .lock()
            .unwrap()
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}
