/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Keep-alive references installed on a global object on behalf of a peer
//! living in another heap.
//!
//! Two heaps are collected independently, so reachability through a port's
//! peer cannot keep the port alive. Instead, while a port is entangled with a
//! port in another heap it owns a [`CrossHeapHandle`] registered in its own
//! global's [`KeepAliveTable`]; the collector treats every id in the table as
//! a root. Dropping the handle is the only way to remove the entry.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use crate::dom::bindings::error::Fallible;

/// Per-global reference counts of objects kept alive by cross-heap handles.
pub struct KeepAliveTable<T> {
    counts: RefCell<HashMap<T, usize>>,
}

impl<T> Default for KeepAliveTable<T> {
    fn default() -> Self {
        KeepAliveTable {
            counts: RefCell::new(HashMap::new()),
        }
    }
}

impl<T: Copy + Eq + Hash> KeepAliveTable<T> {
    pub fn is_kept_alive(&self, id: &T) -> bool {
        self.counts.borrow().contains_key(id)
    }

    pub fn count(&self, id: &T) -> usize {
        self.counts.borrow().get(id).copied().unwrap_or(0)
    }

    pub fn kept_alive(&self) -> Vec<T> {
        self.counts.borrow().keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.borrow().is_empty()
    }

    fn acquire(&self, id: T) -> Fallible<()> {
        let mut counts = self.counts.borrow_mut();
        counts.try_reserve(1)?;
        *counts.entry(id).or_insert(0) += 1;
        Ok(())
    }

    fn release(&self, id: &T) {
        let mut counts = self.counts.borrow_mut();
        if let Some(count) = counts.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                counts.remove(id);
            }
        }
    }
}

/// A strong reference keeping `id` alive in the heap that owns `table`.
pub struct CrossHeapHandle<T: Copy + Eq + Hash> {
    id: T,
    table: Rc<KeepAliveTable<T>>,
}

impl<T: Copy + Eq + Hash> CrossHeapHandle<T> {
    /// Fails only if the table cannot grow.
    pub fn new(table: &Rc<KeepAliveTable<T>>, id: T) -> Fallible<CrossHeapHandle<T>> {
        table.acquire(id)?;
        Ok(CrossHeapHandle {
            id,
            table: table.clone(),
        })
    }

    pub fn id(&self) -> T {
        self.id
    }
}

impl<T: Copy + Eq + Hash> Drop for CrossHeapHandle<T> {
    fn drop(&mut self) {
        self.table.release(&self.id);
    }
}

impl<T: Copy + Eq + Hash + fmt::Debug> fmt::Debug for CrossHeapHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("CrossHeapHandle").field(&self.id).finish()
    }
}
