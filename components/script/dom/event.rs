/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::cell::Cell;

use base::id::{MessagePortId, WorkerId, WorkerObjectId};

use crate::dom::errorevent::ErrorEvent;
use crate::dom::messageevent::MessageEvent;

/// The event types this host dispatches.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventType {
    Message,
    Error,
    Connect,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Message => "message",
            EventType::Error => "error",
            EventType::Connect => "connect",
        }
    }
}

/// Every object that can receive events.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EventTargetId {
    MessagePort(MessagePortId),
    /// The global of a worker, as seen from inside it.
    WorkerGlobalScope(WorkerId),
    /// A `Worker` or `SharedWorker` object in a connecting context.
    Worker(WorkerObjectId),
}

#[derive(Clone, Debug)]
pub enum EventPayload {
    Message(MessageEvent),
    Error(ErrorEvent),
}

/// <https://dom.spec.whatwg.org/#concept-event>
#[derive(Clone, Debug)]
pub struct Event {
    type_: EventType,
    target: EventTargetId,
    payload: EventPayload,
    canceled: Cell<bool>,
}

/// Whether any listener called `preventDefault()`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventStatus {
    Canceled,
    NotCanceled,
}

impl Event {
    pub fn new_message(type_: EventType, target: EventTargetId, event: MessageEvent) -> Event {
        Event {
            type_,
            target,
            payload: EventPayload::Message(event),
            canceled: Cell::new(false),
        }
    }

    pub fn new_error(target: EventTargetId, event: ErrorEvent) -> Event {
        Event {
            type_: EventType::Error,
            target,
            payload: EventPayload::Error(event),
            canceled: Cell::new(false),
        }
    }

    pub fn type_(&self) -> EventType {
        self.type_
    }

    pub fn target(&self) -> EventTargetId {
        self.target
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn message(&self) -> Option<&MessageEvent> {
        match self.payload {
            EventPayload::Message(ref event) => Some(event),
            EventPayload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorEvent> {
        match self.payload {
            EventPayload::Error(ref event) => Some(event),
            EventPayload::Message(_) => None,
        }
    }

    /// The ports carried by a message event.
    pub fn ports(&self) -> &[MessagePortId] {
        self.message().map(MessageEvent::ports).unwrap_or(&[])
    }

    /// <https://dom.spec.whatwg.org/#dom-event-preventdefault>
    pub fn prevent_default(&self) {
        self.canceled.set(true);
    }

    /// <https://dom.spec.whatwg.org/#dom-event-defaultprevented>
    pub fn default_prevented(&self) -> bool {
        self.canceled.get()
    }

    pub fn status(&self) -> EventStatus {
        if self.default_prevented() {
            EventStatus::Canceled
        } else {
            EventStatus::NotCanceled
        }
    }

    /// Point a not-yet-dispatched event at a new target, as when the port it
    /// was queued on is transferred.
    pub(crate) fn retarget(&mut self, target: EventTargetId) {
        self.target = target;
    }

    /// A fresh, uncanceled copy aimed at `target`.
    pub(crate) fn copy_for(&self, target: EventTargetId) -> Event {
        Event {
            type_: self.type_,
            target,
            payload: self.payload.clone(),
            canceled: Cell::new(false),
        }
    }
}
