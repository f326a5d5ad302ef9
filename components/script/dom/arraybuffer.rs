/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::{ArrayBufferId, HeapId};

use crate::dom::bindings::error::{Error, Fallible};
use crate::script_runtime::ScriptHost;

/// <https://tc39.es/ecma262/#sec-arraybuffer-objects>
#[derive(Debug)]
pub struct ArrayBuffer {
    heap: HeapId,
    data: Vec<u8>,
    /// Set once the contents have been transferred away. Permanent.
    neutered: bool,
}

impl ArrayBuffer {
    pub fn new(host: &mut ScriptHost, heap: HeapId, data: Vec<u8>) -> Fallible<ArrayBufferId> {
        if host.global(heap).is_none() {
            return Err(Error::InvalidState);
        }
        let id = ArrayBufferId::new();
        host.buffers.insert(id, ArrayBuffer::new_inherited(heap, data));
        Ok(id)
    }

    pub(crate) fn new_inherited(heap: HeapId, data: Vec<u8>) -> ArrayBuffer {
        ArrayBuffer {
            heap,
            data,
            neutered: false,
        }
    }

    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_length(&self) -> usize {
        self.data.len()
    }

    pub fn is_neutered(&self) -> bool {
        self.neutered
    }

    /// Hand the contents to a transfer, leaving this buffer empty for good.
    pub(crate) fn neuter(&mut self) -> Vec<u8> {
        self.neutered = true;
        std::mem::take(&mut self.data)
    }

    pub(crate) fn adopt(&mut self, data: Vec<u8>) {
        self.data = data;
    }
}
