/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use script_traits::ScriptError;

use crate::dom::event::{Event, EventType};
use crate::script_runtime::ScriptHost;

/// A script callback. Returning `Err` means the callback threw and did not
/// catch the exception.
pub type EventListener = Rc<dyn Fn(&mut ScriptHost, &Event) -> Result<(), ScriptError>>;

#[derive(Clone)]
enum EventListenerType {
    Additive(EventListener),
    /// An `on<event>` handler attribute.
    Inline(EventListener),
}

impl EventListenerType {
    fn listener(&self) -> &EventListener {
        match self {
            EventListenerType::Additive(listener) | EventListenerType::Inline(listener) => listener,
        }
    }
}

/// <https://dom.spec.whatwg.org/#interface-eventtarget>
#[derive(Default)]
pub struct EventTarget {
    handlers: HashMap<EventType, Vec<EventListenerType>>,
}

impl EventTarget {
    /// <https://dom.spec.whatwg.org/#dom-eventtarget-addeventlistener>
    pub fn add_event_listener(&mut self, ty: EventType, listener: EventListener) {
        let entries = self.handlers.entry(ty).or_default();
        let already_added = entries.iter().any(|entry| match entry {
            EventListenerType::Additive(existing) => Rc::ptr_eq(existing, &listener),
            EventListenerType::Inline(_) => false,
        });
        if !already_added {
            entries.push(EventListenerType::Additive(listener));
        }
    }

    /// <https://dom.spec.whatwg.org/#dom-eventtarget-removeeventlistener>
    pub fn remove_event_listener(&mut self, ty: EventType, listener: &EventListener) {
        if let Some(entries) = self.handlers.get_mut(&ty) {
            entries.retain(|entry| match entry {
                EventListenerType::Additive(existing) => !Rc::ptr_eq(existing, listener),
                EventListenerType::Inline(_) => true,
            });
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#event-handler-attributes>
    ///
    /// Replacing a handler keeps its position among the listeners; clearing
    /// it removes the entry.
    pub fn set_event_handler(&mut self, ty: EventType, handler: Option<EventListener>) {
        let entries = self.handlers.entry(ty).or_default();
        let idx = entries
            .iter()
            .position(|entry| matches!(entry, EventListenerType::Inline(_)));
        match (idx, handler) {
            (Some(idx), Some(handler)) => entries[idx] = EventListenerType::Inline(handler),
            (Some(idx), None) => {
                entries.remove(idx);
            },
            (None, Some(handler)) => entries.push(EventListenerType::Inline(handler)),
            (None, None) => {},
        }
    }

    pub fn get_event_handler(&self, ty: EventType) -> Option<EventListener> {
        self.handlers.get(&ty).and_then(|entries| {
            entries.iter().find_map(|entry| match entry {
                EventListenerType::Inline(handler) => Some(handler.clone()),
                EventListenerType::Additive(_) => None,
            })
        })
    }

    pub fn has_listeners_for(&self, ty: EventType) -> bool {
        self.handlers
            .get(&ty)
            .is_some_and(|entries| !entries.is_empty())
    }

    /// A snapshot of the listeners, so that dispatch is unaffected by
    /// listeners added or removed while it runs.
    pub fn get_listeners_for(&self, ty: EventType) -> Vec<EventListener> {
        self.handlers
            .get(&ty)
            .map(|entries| entries.iter().map(|entry| entry.listener().clone()).collect())
            .unwrap_or_default()
    }

    /// Drop every `on<event>` handler, leaving `addEventListener` listeners.
    pub fn clear_event_handlers(&mut self) {
        for entries in self.handlers.values_mut() {
            entries.retain(|entry| matches!(entry, EventListenerType::Additive(_)));
        }
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut map = f.debug_map();
        for (ty, entries) in &self.handlers {
            map.entry(&ty.as_str(), &entries.len());
        }
        map.finish()
    }
}
