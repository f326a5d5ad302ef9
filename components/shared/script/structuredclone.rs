/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

use base::id::{ArrayBufferId, MessagePortId};

/// A script-visible value, as far as cloning and transferring care.
#[derive(Clone, Debug, PartialEq)]
pub enum ScriptValue {
    /// `undefined`
    Undefined,
    /// `null`
    Null,
    /// A boolean primitive.
    Boolean(bool),
    /// A number primitive.
    Number(f64),
    /// A string primitive.
    String(String),
    /// An array of values.
    Array(Vec<ScriptValue>),
    /// A plain object with its own properties in definition order.
    Object(Vec<(String, Property)>),
    /// A function, carrying its name for diagnostics.
    Function(String),
    /// A platform object that has no serialization steps, by interface name.
    HostObject(String),
    /// A `MessagePort`.
    MessagePort(MessagePortId),
    /// An `ArrayBuffer`.
    ArrayBuffer(ArrayBufferId),
}

impl ScriptValue {
    /// Whether this is a primitive, copied by value without any walk.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            ScriptValue::Undefined |
                ScriptValue::Null |
                ScriptValue::Boolean(_) |
                ScriptValue::Number(_) |
                ScriptValue::String(_)
        )
    }

    /// Look up an own data property of an object.
    pub fn get_property(&self, name: &str) -> Option<&ScriptValue> {
        match self {
            ScriptValue::Object(properties) => {
                properties
                    .iter()
                    .find_map(|(key, property)| match property {
                        Property::Data(value) if key == name => Some(value),
                        _ => None,
                    })
            },
            _ => None,
        }
    }
}

/// An own property of an object.
#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    /// A plain value.
    Data(ScriptValue),
    /// A getter and/or setter pair.
    Accessor,
}

/// An object whose ownership, rather than its value, moves on `postMessage`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Transferable {
    /// A message port.
    Port(MessagePortId),
    /// A binary buffer.
    Buffer(ArrayBufferId),
}

/// Why a value could not be cloned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloneFault {
    /// A platform object that cannot be serialized, including ports that are
    /// referenced but not transferred.
    HostObject,
    /// A function value.
    Function,
    /// An accessor property.
    Accessor,
    /// A buffer whose contents were already transferred away.
    DetachedBuffer,
}

impl CloneFault {
    /// The message surfaced with the `DataCloneError`.
    pub fn description(&self) -> &'static str {
        match self {
            CloneFault::HostObject => "Unable to clone host objects.",
            CloneFault::Function => "Unable to clone function values.",
            CloneFault::Accessor => "Unable to clone getter and setter properties.",
            CloneFault::DetachedBuffer => "Unable to clone detached buffers.",
        }
    }
}

impl fmt::Display for CloneFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// The receiving side of a clone: knows which objects are being transferred
/// and can allocate copies in the target context.
pub trait CloneTarget {
    /// The target-context object standing in for a transferred source object.
    fn transferred(&self, source: Transferable) -> Option<Transferable>;

    /// Copy a buffer that is referenced but not transferred.
    fn copy_buffer(&mut self, source: ArrayBufferId) -> Result<ArrayBufferId, CloneFault>;
}

/// Performs the value-level structural copy of a value into another context.
pub trait StructuredCloneHost {
    /// Clone `value`, resolving transferables and buffer copies through `target`.
    fn clone_value(
        &self,
        value: &ScriptValue,
        target: &mut dyn CloneTarget,
    ) -> Result<ScriptValue, CloneFault>;
}

/// <https://html.spec.whatwg.org/multipage/#structuredserializeinternal>
#[derive(Default)]
pub struct DefaultStructuredCloneHost;

impl StructuredCloneHost for DefaultStructuredCloneHost {
    fn clone_value(
        &self,
        value: &ScriptValue,
        target: &mut dyn CloneTarget,
    ) -> Result<ScriptValue, CloneFault> {
        Ok(match value {
            ScriptValue::Undefined => ScriptValue::Undefined,
            ScriptValue::Null => ScriptValue::Null,
            ScriptValue::Boolean(value) => ScriptValue::Boolean(*value),
            ScriptValue::Number(value) => ScriptValue::Number(*value),
            ScriptValue::String(value) => ScriptValue::String(value.clone()),
            ScriptValue::Array(items) => ScriptValue::Array(
                items
                    .iter()
                    .map(|item| self.clone_value(item, target))
                    .collect::<Result<_, _>>()?,
            ),
            ScriptValue::Object(properties) => {
                let mut cloned = Vec::with_capacity(properties.len());
                for (key, property) in properties {
                    let Property::Data(value) = property else {
                        return Err(CloneFault::Accessor);
                    };
                    cloned.push((key.clone(), Property::Data(self.clone_value(value, target)?)));
                }
                ScriptValue::Object(cloned)
            },
            ScriptValue::Function(_) => return Err(CloneFault::Function),
            ScriptValue::HostObject(_) => return Err(CloneFault::HostObject),
            ScriptValue::MessagePort(port) => match target.transferred(Transferable::Port(*port)) {
                Some(Transferable::Port(new_port)) => ScriptValue::MessagePort(new_port),
                _ => return Err(CloneFault::HostObject),
            },
            ScriptValue::ArrayBuffer(buffer) => {
                match target.transferred(Transferable::Buffer(*buffer)) {
                    Some(Transferable::Buffer(new_buffer)) => ScriptValue::ArrayBuffer(new_buffer),
                    Some(Transferable::Port(_)) => return Err(CloneFault::HostObject),
                    None => ScriptValue::ArrayBuffer(target.copy_buffer(*buffer)?),
                }
            },
        })
    }
}
