/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The mapping from [transferable objects] in the sending context to the
//! objects standing in for them in the receiving context.
//!
//! [transferable objects]: https://html.spec.whatwg.org/multipage/#transferable-objects

use std::collections::HashMap;

use base::id::{ArrayBufferId, MessagePortId};
use script_traits::Transferable;

/// Source to target pairs, in the order the transfer list named them. Built
/// while cloning a message, consumed once by the commit step.
#[derive(Debug, Default)]
pub struct TransferMap {
    entries: Vec<(Transferable, Transferable)>,
    /// Position of each source in `entries`.
    index: HashMap<Transferable, usize>,
}

impl TransferMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, source: Transferable) -> bool {
        self.lookup(source).is_some()
    }

    pub fn lookup(&self, source: Transferable) -> Option<Transferable> {
        self.index
            .get(&source)
            .and_then(|position| self.entries.get(*position))
            .map(|(_, to)| *to)
    }

    /// Record `source -> target`. A source already present keeps its first
    /// target.
    pub(crate) fn insert(&mut self, source: Transferable, target: Transferable) {
        if self.index.contains_key(&source) {
            return;
        }
        self.index.insert(source, self.entries.len());
        self.entries.push((source, target));
    }

    /// `(source, new)` pairs for every transferred port.
    pub fn port_pairs(&self) -> Vec<(MessagePortId, MessagePortId)> {
        self.entries
            .iter()
            .filter_map(|entry| match *entry {
                (Transferable::Port(from), Transferable::Port(to)) => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    /// `(source, new)` pairs for every transferred buffer.
    pub fn buffer_pairs(&self) -> Vec<(ArrayBufferId, ArrayBufferId)> {
        self.entries
            .iter()
            .filter_map(|entry| match *entry {
                (Transferable::Buffer(from), Transferable::Buffer(to)) => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    /// The new ports, as exposed on the receiving `MessageEvent`.
    pub fn new_ports(&self) -> Vec<MessagePortId> {
        self.port_pairs().into_iter().map(|(_, to)| to).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_target_wins_and_order_is_kept() {
        let sources: Vec<MessagePortId> = (0..4).map(|_| MessagePortId::new()).collect();
        let targets: Vec<MessagePortId> = (0..4).map(|_| MessagePortId::new()).collect();
        let mut map = TransferMap::default();
        for (from, to) in sources.iter().zip(&targets) {
            map.insert(Transferable::Port(*from), Transferable::Port(*to));
        }
        map.insert(Transferable::Port(sources[2]), Transferable::Port(MessagePortId::new()));

        assert_eq!(map.len(), 4);
        assert_eq!(
            map.lookup(Transferable::Port(sources[2])),
            Some(Transferable::Port(targets[2]))
        );
        assert!(!map.contains(Transferable::Port(targets[0])));
        assert_eq!(map.new_ports(), targets);
    }
}
