use serde::{Deserialize, Serialize};
use std::fmt;

/// Order identifier, unique within a run. Allocated in strictly increasing order,
/// so ascending id is also submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic order id allocator.
#[derive(Debug, Clone, Default)]
pub struct OrderIdGen {
    next: u64,
}

impl OrderIdGen {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> OrderId {
        if self.next == 0 {
            self.next = 1;
        }
        let id = OrderId(self.next);
        self.next += 1;
        id
    }
}

/// Deterministic run ID: BLAKE3 hex digest of the canonical run configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines and file names.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_ids_are_monotonic() {
        let mut ids = OrderIdGen::new();
        let a = ids.next_id();
        let b = ids.next_id();
        assert_eq!(a, OrderId(1));
        assert!(b > a);
    }

    #[test]
    fn default_generator_starts_at_one() {
        let mut ids = OrderIdGen::default();
        assert_eq!(ids.next_id(), OrderId(1));
    }

    #[test]
    fn run_id_is_content_addressed() {
        let a = RunId::from_bytes(b"config-a");
        let b = RunId::from_bytes(b"config-a");
        let c = RunId::from_bytes(b"config-b");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.0.len(), 64);
        assert_eq!(a.short().len(), 12);
    }
}
