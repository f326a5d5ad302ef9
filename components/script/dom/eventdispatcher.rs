/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use log::debug;

use crate::dom::bindings::error::Fallible;
use crate::dom::event::{Event, EventStatus};
use crate::script_runtime::ScriptHost;

/// <https://dom.spec.whatwg.org/#concept-event-dispatch>
///
/// Listeners run in registration order. A listener that throws does not stop
/// the others; its exception is reported in the heap of the target.
pub(crate) fn dispatch_event(host: &mut ScriptHost, event: &Event) -> Fallible<EventStatus> {
    let target = event.target();
    let Some(heap) = host.heap_of(target) else {
        debug!("Dropping {} event for vanished target {:?}", event.type_().as_str(), target);
        return Ok(EventStatus::NotCanceled);
    };
    let listeners = match host.event_target(target) {
        Some(eventtarget) => eventtarget.get_listeners_for(event.type_()),
        None => return Ok(EventStatus::NotCanceled),
    };

    // Ports arriving with a message become reachable from script in the
    // receiving heap.
    if !event.ports().is_empty() {
        host.root_ports(heap, event.ports())?;
    }

    for listener in listeners {
        if let Err(exception) = listener(host, event) {
            host.report_exception(heap, exception);
        }
    }
    Ok(event.status())
}
