//! Fresh loop-index names

/// Hands out a new, never-repeated symbol per call
pub trait SymbolAllocator {
    fn fresh(&mut self) -> String;
}

/// Symbol allocator producing `{prefix}{n}` names
#[derive(Debug, Clone)]
pub struct IndexAllocator {
    /// Variable name prefix for loop indices
    prefix: String,
    next: usize,
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::with_prefix("i")
    }

    /// Create an allocator with a custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    /// Number of names handed out so far
    pub fn issued(&self) -> usize {
        self.next
    }
}

impl SymbolAllocator for IndexAllocator {
    fn fresh(&mut self) -> String {
        let name = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_is_monotonic() {
        let mut alloc = IndexAllocator::new();
        assert_eq!(alloc.fresh(), "i0");
        assert_eq!(alloc.fresh(), "i1");
        assert_eq!(alloc.issued(), 2);
    }

    #[test]
    fn test_custom_prefix() {
        let mut alloc = IndexAllocator::with_prefix("ridx");
        assert_eq!(alloc.fresh(), "ridx0");
    }
}
