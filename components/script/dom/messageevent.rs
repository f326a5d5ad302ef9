/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::MessagePortId;
use script_traits::ScriptValue;

use crate::dom::event::EventTargetId;

/// <https://html.spec.whatwg.org/multipage/#messageevent>
#[derive(Clone, Debug)]
pub struct MessageEvent {
    data: ScriptValue,
    origin: String,
    last_event_id: String,
    source: Option<EventTargetId>,
    ports: Vec<MessagePortId>,
}

impl MessageEvent {
    pub fn new(
        data: ScriptValue,
        origin: String,
        source: Option<EventTargetId>,
        ports: Vec<MessagePortId>,
    ) -> MessageEvent {
        MessageEvent {
            data,
            origin,
            last_event_id: String::new(),
            source,
            ports,
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageevent-data>
    pub fn data(&self) -> &ScriptValue {
        &self.data
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageevent-origin>
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageevent-lasteventid>
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageevent-source>
    pub fn source(&self) -> Option<EventTargetId> {
        self.source
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageevent-ports>
    pub fn ports(&self) -> &[MessagePortId] {
        &self.ports
    }
}
