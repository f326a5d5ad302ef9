/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Namespaced identifiers for the objects managed by a script host.
//!
//! Every thread that mints identifiers lazily claims a process-unique
//! [`NamespaceId`]; identifiers are then `(namespace, index)` pairs, so two
//! hosts running on different threads never hand out colliding ids.

use std::cell::Cell;
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_NAMESPACE: AtomicU32 = AtomicU32::new(1);

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct NamespaceId(pub u32);

/// Per-thread id allocator.
#[derive(Clone, Copy)]
struct IdNamespace {
    id: NamespaceId,
    next_index: u32,
}

thread_local!(static ID_NAMESPACE: Cell<Option<IdNamespace>> = const { Cell::new(None) });

impl IdNamespace {
    fn claim() -> IdNamespace {
        IdNamespace {
            id: NamespaceId(NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)),
            next_index: 0,
        }
    }

    fn next_index(&mut self) -> NonZeroU32 {
        self.next_index = self.next_index.wrapping_add(1);
        NonZeroU32::new(self.next_index).unwrap_or(NonZeroU32::MIN)
    }
}

/// Allocate the next `(namespace, index)` pair for the current thread.
fn next_pair() -> (NamespaceId, NonZeroU32) {
    ID_NAMESPACE.with(|tls| {
        let mut namespace = tls.get().unwrap_or_else(IdNamespace::claim);
        let index = namespace.next_index();
        tls.set(Some(namespace));
        (namespace.id, index)
    })
}

macro_rules! namespace_id {
    ($(#[$meta:meta])* $id_name:ident, $display_prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        pub struct $id_name {
            pub namespace_id: NamespaceId,
            pub index: NonZeroU32,
        }

        impl $id_name {
            #[allow(clippy::new_without_default)]
            pub fn new() -> $id_name {
                let (namespace_id, index) = next_pair();
                $id_name {
                    namespace_id,
                    index,
                }
            }
        }

        impl fmt::Display for $id_name {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                write!(
                    fmt,
                    "{}({},{})",
                    $display_prefix,
                    self.namespace_id.0,
                    self.index.get()
                )
            }
        }

        impl fmt::Debug for $id_name {
            fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(self, fmt)
            }
        }
    };
}

namespace_id! {
    /// An execution context with its own garbage-collected heap.
    HeapId, "Heap"
}

namespace_id!(MessagePortId, "MessagePort");

namespace_id! {
    /// The inside representation of a worker, living in the worker's own heap.
    WorkerId, "Worker"
}

namespace_id! {
    /// An outside representation of a worker, living in a connecting context.
    WorkerObjectId, "WorkerObject"
}

namespace_id!(WorkerDomainId, "WorkerDomain");

namespace_id!(ArrayBufferId, "ArrayBuffer");

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;

    use super::*;

    #[test]
    fn ids_are_unique_within_a_thread() {
        let ids: HashSet<MessagePortId> = (0..100).map(|_| MessagePortId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn threads_use_distinct_namespaces() {
        let here = HeapId::new();
        let there = thread::spawn(HeapId::new).join().unwrap();
        assert_ne!(here.namespace_id, there.namespace_id);
        assert_ne!(here, there);
    }

    #[test]
    fn display_names_the_kind() {
        let id = WorkerDomainId::new();
        assert!(id.to_string().starts_with("WorkerDomain("));
    }
}
