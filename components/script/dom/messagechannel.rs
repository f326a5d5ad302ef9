/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::{HeapId, MessagePortId};

use crate::dom::bindings::error::Fallible;
use crate::dom::messageport::MessagePort;
use crate::script_runtime::ScriptHost;

/// <https://html.spec.whatwg.org/multipage/#messagechannel>
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MessageChannel {
    port1: MessagePortId,
    port2: MessagePortId,
}

impl MessageChannel {
    /// <https://html.spec.whatwg.org/multipage/#dom-messagechannel>
    ///
    /// Both ports are held by the calling script until it lets go of them.
    pub fn new(host: &mut ScriptHost, incumbent: HeapId) -> Fallible<MessageChannel> {
        // Step 1
        let port1 = MessagePort::new(host, incumbent)?;

        // Step 2
        let port2 = match MessagePort::new(host, incumbent) {
            Ok(port2) => port2,
            Err(error) => {
                MessagePort::destroy(host, port1);
                return Err(error);
            },
        };

        // Step 3
        let rooted = host
            .root_port(incumbent, port1)
            .and_then(|_| host.root_port(incumbent, port2))
            .and_then(|_| MessagePort::entangle(host, port1, port2));
        if let Err(error) = rooted {
            MessagePort::destroy(host, port1);
            MessagePort::destroy(host, port2);
            return Err(error);
        }

        // Steps 4-6
        Ok(MessageChannel { port1, port2 })
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messagechannel-port1>
    pub fn port1(&self) -> MessagePortId {
        self.port1
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messagechannel-port2>
    pub fn port2(&self) -> MessagePortId {
        self.port2
    }
}
