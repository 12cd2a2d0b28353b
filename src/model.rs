//! Sequential register model
//!
//! Pure state-transition function for single-register read/write/cas
//! semantics. The checker applies candidate linearizations against this
//! model; nothing else mutates it.

/// Single-register model state (None = never written)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Register {
    value: Option<String>,
}

impl Default for Register {
    fn default() -> Self {
        Self::new()
    }
}

impl Register {
    /// Create a register in its initial, unwritten state
    pub fn new() -> Self {
        Register { value: None }
    }

    /// Current value
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// A write is always valid and replaces the value
    pub fn apply_write(&mut self, value: &str) {
        self.value = Some(value.to_string());
    }

    /// A read is valid iff it observed the current value
    pub fn check_read(&self, observed: &Option<String>) -> bool {
        self.value == *observed
    }

    /// Would a cas against `old` apply in the current state?
    pub fn cas_would_apply(&self, old: &str) -> bool {
        self.value.as_deref() == Some(old)
    }

    /// A cas that claims outcome `applied` is valid iff the comparison
    /// result matches; when it applies, the value becomes `new`.
    pub fn check_cas(&mut self, old: &str, new: &str, applied: bool) -> bool {
        let would_apply = self.cas_would_apply(old);
        if would_apply != applied {
            return false;
        }
        if applied {
            self.value = Some(new.to_string());
        }
        true
    }

    /// Apply a cas whose definite outcome is unknown: takes effect only if
    /// the comparison succeeds. Always valid. Returns whether it applied.
    pub fn apply_cas_unconditional(&mut self, old: &str, new: &str) -> bool {
        if self.cas_would_apply(old) {
            self.value = Some(new.to_string());
            true
        } else {
            false
        }
    }
}
