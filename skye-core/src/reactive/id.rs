//! Identifiers for nodes of the reactive graph.
//!
//! Computations, deps, and targets each get a unique id when created. Ids are
//! used as keys in subscriber sets, the batch queue, and the proxy registry,
//! so identity never depends on pointer addresses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Generate a new unique id.
            pub fn new() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(0);
                Self(COUNTER.fetch_add(1, Ordering::Relaxed))
            }

            pub fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Identity of a [`Computation`](super::Computation).
    ComputationId,
    "effect"
);

define_id!(
    /// Identity of a [`Dep`](super::Dep).
    DepId,
    "dep"
);

define_id!(
    /// Identity injected into every [`Target`](super::Target). The proxy
    /// registry is keyed by it.
    TargetId,
    "target"
);
