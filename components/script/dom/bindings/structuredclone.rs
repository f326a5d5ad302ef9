/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This module implements structured cloning with a transfer list, as defined
//! by [HTML](https://html.spec.whatwg.org/multipage/#safe-passing-of-structured-data).
//!
//! Sending a message runs in four phases: validate the transfer list, create
//! the target-side stand-ins, clone the data, then commit the transfer. Every
//! phase before the commit can fail and leaves the sender untouched; the
//! stand-ins created so far are discarded.

use std::collections::{HashMap, HashSet};
use std::fmt;

use base::id::{ArrayBufferId, HeapId, MessagePortId, WorkerId};
use log::debug;
use script_traits::{CloneFault, CloneTarget, ScriptValue, Transferable};

use crate::dom::arraybuffer::ArrayBuffer;
use crate::dom::bindings::error::{CloneErrorInfo, Error, ErrorResult, Fallible};
use crate::dom::bindings::transferable::TransferMap;
use crate::dom::messageport::MessagePort;
use crate::script_runtime::ScriptHost;

/// The longest transfer list accepted.
pub const MAX_TRANSFERABLES: usize = 1 << 16;

/// Why a transfer list was rejected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransferValidationFailure {
    /// The list is neither an array nor an object with a `length`.
    NotASequence,
    /// The `length` is not a finite number in range.
    InvalidLength,
    NullEntry,
    /// The entry is not a port or a buffer.
    NotTransferable,
    /// The entry belongs to another context.
    Foreign,
    /// The entry has already been transferred away.
    Neutered,
    /// The entry is the sending port or its entangled port.
    SourceOrTargetPort,
    Duplicate,
}

impl TransferValidationFailure {
    pub fn description(&self) -> &'static str {
        match self {
            TransferValidationFailure::NotASequence => "Transfer list is not an array-like object",
            TransferValidationFailure::InvalidLength => "Transfer list has an invalid length",
            TransferValidationFailure::NullEntry => "Transfer list contains null",
            TransferValidationFailure::NotTransferable => {
                "Transfer list contains a value that cannot be transferred"
            },
            TransferValidationFailure::Foreign => {
                "Transfer list contains an object from another context"
            },
            TransferValidationFailure::Neutered => {
                "Transfer list contains an object that was already transferred"
            },
            TransferValidationFailure::SourceOrTargetPort => {
                "Transfer list contains the source or target port"
            },
            TransferValidationFailure::Duplicate => "Transfer list contains duplicates",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TransferValidationError {
    /// The offending position, absent when the list itself is unusable.
    pub index: Option<usize>,
    pub failure: TransferValidationFailure,
}

impl TransferValidationError {
    fn at(index: usize, failure: TransferValidationFailure) -> TransferValidationError {
        TransferValidationError {
            index: Some(index),
            failure,
        }
    }

    fn whole_list(failure: TransferValidationFailure) -> TransferValidationError {
        TransferValidationError {
            index: None,
            failure,
        }
    }
}

impl fmt::Display for TransferValidationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "{} (index {})", self.failure.description(), index),
            None => f.write_str(self.failure.description()),
        }
    }
}

impl From<TransferValidationError> for Error {
    fn from(error: TransferValidationError) -> Error {
        Error::DataClone(Some(CloneErrorInfo {
            description: error.to_string(),
            location: "transfer list".to_owned(),
        }))
    }
}

/// The parties to one clone.
pub(crate) struct CloneEndpoints {
    pub source_heap: HeapId,
    pub source_port: Option<MessagePortId>,
    pub target_port: Option<MessagePortId>,
    pub target_heap: HeapId,
    /// The worker that transferred ports get registered with.
    pub new_owner: Option<WorkerId>,
    /// Named in a `DataCloneError`.
    pub location: &'static str,
}

fn transfer_list_entries(list: &ScriptValue) -> Result<Vec<ScriptValue>, TransferValidationError> {
    match list {
        ScriptValue::Array(items) if items.len() > MAX_TRANSFERABLES => Err(
            TransferValidationError::whole_list(TransferValidationFailure::InvalidLength),
        ),
        ScriptValue::Array(items) => Ok(items.clone()),
        ScriptValue::Object(_) => {
            let length = match list.get_property("length") {
                Some(ScriptValue::Number(length))
                    if length.is_finite() &&
                        *length >= 0.0 &&
                        *length <= MAX_TRANSFERABLES as f64 =>
                {
                    *length as usize
                },
                _ => {
                    return Err(TransferValidationError::whole_list(
                        TransferValidationFailure::InvalidLength,
                    ));
                },
            };
            Ok((0..length)
                .map(|index| {
                    list.get_property(&index.to_string())
                        .cloned()
                        .unwrap_or(ScriptValue::Undefined)
                })
                .collect())
        },
        _ => Err(TransferValidationError::whole_list(
            TransferValidationFailure::NotASequence,
        )),
    }
}

/// Check a transfer list and resolve it into transferables, in list order.
///
/// `undefined` entries are skipped. Nothing is modified.
pub fn validate_transferables(
    host: &ScriptHost,
    list: &ScriptValue,
    source_heap: HeapId,
    source_port: Option<MessagePortId>,
    target_port: Option<MessagePortId>,
) -> Result<Vec<Transferable>, TransferValidationError> {
    use TransferValidationFailure::*;

    let mut validated: Vec<Transferable> = Vec::new();
    let mut seen: HashSet<Transferable> = HashSet::new();
    for (index, entry) in transfer_list_entries(list)?.iter().enumerate() {
        let fail = |failure| TransferValidationError::at(index, failure);
        let transferable = match entry {
            ScriptValue::Undefined => continue,
            ScriptValue::Null => return Err(fail(NullEntry)),
            ScriptValue::MessagePort(id) => {
                let port = host.port(*id).ok_or(fail(NotTransferable))?;
                if port.heap() != source_heap {
                    return Err(fail(Foreign));
                }
                if port.is_neutered() {
                    return Err(fail(Neutered));
                }
                if Some(*id) == source_port || Some(*id) == target_port {
                    return Err(fail(SourceOrTargetPort));
                }
                Transferable::Port(*id)
            },
            ScriptValue::ArrayBuffer(id) => {
                let buffer = host.buffer(*id).ok_or(fail(NotTransferable))?;
                if buffer.heap() != source_heap {
                    return Err(fail(Foreign));
                }
                if buffer.is_neutered() {
                    return Err(fail(Neutered));
                }
                Transferable::Buffer(*id)
            },
            _ => return Err(fail(NotTransferable)),
        };
        if !seen.insert(transferable) {
            return Err(fail(Duplicate));
        }
        validated.push(transferable);
    }
    Ok(validated)
}

/// Create the target-side stand-in for each validated transferable: a fresh
/// unentangled port, or a fresh empty buffer.
pub fn clone_transferables(
    host: &mut ScriptHost,
    validated: &[Transferable],
    target_heap: HeapId,
) -> Fallible<TransferMap> {
    let mut map = TransferMap::default();
    for source in validated {
        if map.contains(*source) {
            continue;
        }
        let created = match source {
            Transferable::Port(_) => MessagePort::new(host, target_heap).map(Transferable::Port),
            Transferable::Buffer(_) => {
                ArrayBuffer::new(host, target_heap, Vec::new()).map(Transferable::Buffer)
            },
        };
        match created {
            Ok(target) => map.insert(*source, target),
            Err(error) => {
                discard_transferables(host, &map);
                return Err(error);
            },
        }
    }
    Ok(map)
}

/// Undo [`clone_transferables`].
pub fn discard_transferables(host: &mut ScriptHost, map: &TransferMap) {
    for (_, new_port) in map.port_pairs() {
        MessagePort::destroy(host, new_port);
    }
    for (_, new_buffer) in map.buffer_pairs() {
        host.buffers.remove(&new_buffer);
    }
}

struct HeapCloneTarget<'a> {
    buffers: &'a mut HashMap<ArrayBufferId, ArrayBuffer>,
    map: &'a TransferMap,
    target_heap: HeapId,
    /// Buffers copied so far, removed again if the clone fails.
    copies: Vec<ArrayBufferId>,
}

impl CloneTarget for HeapCloneTarget<'_> {
    fn transferred(&self, source: Transferable) -> Option<Transferable> {
        self.map.lookup(source)
    }

    fn copy_buffer(&mut self, source: ArrayBufferId) -> Result<ArrayBufferId, CloneFault> {
        let buffer = self.buffers.get(&source).ok_or(CloneFault::HostObject)?;
        if buffer.is_neutered() {
            return Err(CloneFault::DetachedBuffer);
        }
        let copy = ArrayBuffer::new_inherited(self.target_heap, buffer.data().to_vec());
        let id = ArrayBufferId::new();
        self.buffers.insert(id, copy);
        self.copies.push(id);
        Ok(id)
    }
}

/// Clone `value` into `target_heap`, substituting transferred objects from
/// `map`.
pub fn clone_data(
    host: &mut ScriptHost,
    value: &ScriptValue,
    map: &TransferMap,
    target_heap: HeapId,
    location: &str,
) -> Fallible<ScriptValue> {
    if value.is_primitive() {
        return Ok(value.clone());
    }

    let clone_host = host.embedder.clone_host.clone();
    let mut target = HeapCloneTarget {
        buffers: &mut host.buffers,
        map,
        target_heap,
        copies: Vec::new(),
    };
    match clone_host.clone_value(value, &mut target) {
        Ok(cloned) => Ok(cloned),
        Err(fault) => {
            for copy in std::mem::take(&mut target.copies) {
                target.buffers.remove(&copy);
            }
            debug!("Clone for {} failed: {}", location, fault);
            Err(Error::DataClone(Some(CloneErrorInfo {
                description: fault.description().to_owned(),
                location: location.to_owned(),
            })))
        },
    }
}

/// Move every transferable in `map` to its stand-in. Only the port planning
/// can fail, and it runs before anything is moved.
pub fn commit_transferables(
    host: &mut ScriptHost,
    map: &TransferMap,
    new_owner: Option<WorkerId>,
) -> ErrorResult {
    let port_pairs = map.port_pairs();
    let plans = MessagePort::plan_transfers(host, &port_pairs)?;

    for (source, target) in map.buffer_pairs() {
        let Some(data) = host.buffers.get_mut(&source).map(ArrayBuffer::neuter) else {
            continue;
        };
        if let Some(buffer) = host.buffers.get_mut(&target) {
            buffer.adopt(data);
        }
    }
    MessagePort::complete_transfers(host, &port_pairs, plans, new_owner);
    Ok(())
}

/// <https://html.spec.whatwg.org/multipage/#structuredserializewithtransfer>
///
/// Returns the cloned data and the ports arriving with it.
pub(crate) fn write_with_transfer(
    host: &mut ScriptHost,
    message: &ScriptValue,
    transfer: Option<&ScriptValue>,
    endpoints: &CloneEndpoints,
) -> Fallible<(ScriptValue, Vec<MessagePortId>)> {
    let validated = match transfer {
        Some(list) => validate_transferables(
            host,
            list,
            endpoints.source_heap,
            endpoints.source_port,
            endpoints.target_port,
        )?,
        None => Vec::new(),
    };

    let map = clone_transferables(host, &validated, endpoints.target_heap)?;
    let data = match clone_data(host, message, &map, endpoints.target_heap, endpoints.location) {
        Ok(data) => data,
        Err(error) => {
            discard_transferables(host, &map);
            return Err(error);
        },
    };
    if let Err(error) = commit_transferables(host, &map, endpoints.new_owner) {
        discard_transferables(host, &map);
        return Err(error);
    }
    Ok((data, map.new_ports()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_lists_are_read_by_length() {
        let list = ScriptValue::Object(vec![
            (
                "length".to_owned(),
                script_traits::Property::Data(ScriptValue::Number(2.0)),
            ),
            (
                "1".to_owned(),
                script_traits::Property::Data(ScriptValue::Null),
            ),
        ]);
        assert_eq!(
            transfer_list_entries(&list).unwrap(),
            vec![ScriptValue::Undefined, ScriptValue::Null]
        );
    }

    #[test]
    fn unusable_lists_have_no_index() {
        let too_long = ScriptValue::Object(vec![(
            "length".to_owned(),
            script_traits::Property::Data(ScriptValue::Number(f64::INFINITY)),
        )]);
        let error = transfer_list_entries(&too_long).unwrap_err();
        assert_eq!(error.index, None);
        assert_eq!(error.failure, TransferValidationFailure::InvalidLength);

        let error = transfer_list_entries(&ScriptValue::Number(1.0)).unwrap_err();
        assert_eq!(error.failure, TransferValidationFailure::NotASequence);
    }
}
