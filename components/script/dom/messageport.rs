/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::{HashMap, HashSet};

use base::id::{HeapId, MessagePortId, WorkerId};
use log::{debug, warn};
use script_traits::ScriptValue;

use crate::dom::bindings::crossheap::CrossHeapHandle;
use crate::dom::bindings::error::{Error, ErrorResult, Fallible};
use crate::dom::bindings::structuredclone::{self, CloneEndpoints};
use crate::dom::event::{Event, EventTargetId, EventType};
use crate::dom::eventqueue::{EventQueue, EventQueueId, deliver_event, drain_event_queue};
use crate::dom::eventtarget::{EventListener, EventTarget};
use crate::dom::messageevent::MessageEvent;
use crate::script_runtime::{Continuation, ScriptHost};

/// <https://html.spec.whatwg.org/multipage/#messageport>
pub struct MessagePort {
    eventtarget: EventTarget,
    message_port_id: MessagePortId,
    heap: HeapId,
    entangled_port: Option<MessagePortId>,
    /// Deliveries addressed to this port go to the alias instead.
    forwarding_port: Option<MessagePortId>,
    enabled: bool,
    /// Set once the port has been transferred away. Permanent.
    neutered: bool,
    message_queue: EventQueue,
    /// Present exactly while the entangled port lives in another heap.
    keep_alive: Option<CrossHeapHandle<MessagePortId>>,
    /// The worker whose entangled-port list holds this port.
    owner: Option<WorkerId>,
}

/// The fallible half of an entanglement, done before any port is touched.
pub(crate) struct EntanglementPlan {
    first: MessagePortId,
    second: MessagePortId,
    first_handle: Option<CrossHeapHandle<MessagePortId>>,
    second_handle: Option<CrossHeapHandle<MessagePortId>>,
}

impl MessagePort {
    /// Create a port in the global identified by `heap`.
    pub fn new(host: &mut ScriptHost, heap: HeapId) -> Fallible<MessagePortId> {
        let global = host.globals.get_mut(&heap).ok_or(Error::InvalidState)?;
        let message_port_id = MessagePortId::new();
        global.track_message_port(message_port_id)?;
        host.ports.insert(
            message_port_id,
            MessagePort {
                eventtarget: EventTarget::default(),
                message_port_id,
                heap,
                entangled_port: None,
                forwarding_port: None,
                enabled: false,
                neutered: false,
                message_queue: EventQueue::default(),
                keep_alive: None,
                owner: None,
            },
        );
        Ok(message_port_id)
    }

    pub fn message_port_id(&self) -> MessagePortId {
        self.message_port_id
    }

    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn entangled_port(&self) -> Option<MessagePortId> {
        self.entangled_port
    }

    pub fn forwarding_port(&self) -> Option<MessagePortId> {
        self.forwarding_port
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_neutered(&self) -> bool {
        self.neutered
    }

    /// Whether this port currently keeps itself alive on its global on
    /// behalf of a peer in another heap.
    pub fn has_cross_heap_handle(&self) -> bool {
        self.keep_alive.is_some()
    }

    pub fn owner(&self) -> Option<WorkerId> {
        self.owner
    }

    pub fn message_queue(&self) -> &EventQueue {
        &self.message_queue
    }

    pub fn eventtarget(&self) -> &EventTarget {
        &self.eventtarget
    }

    pub(crate) fn eventtarget_mut(&mut self) -> &mut EventTarget {
        &mut self.eventtarget
    }

    pub(crate) fn message_queue_mut(&mut self) -> &mut EventQueue {
        &mut self.message_queue
    }

    pub(crate) fn set_owner(&mut self, owner: Option<WorkerId>) {
        self.owner = owner;
    }

    /// <https://html.spec.whatwg.org/multipage/#entangle>
    ///
    /// Both ports leave any previous entanglement first. Fails without
    /// changing anything if either port has been transferred away, if the
    /// ports span origins the security policy keeps apart, or if a
    /// cross-heap keep-alive cannot be installed.
    pub fn entangle(host: &mut ScriptHost, port: MessagePortId, other: MessagePortId) -> ErrorResult {
        if port == other {
            return Err(Error::InvalidAccess);
        }
        let this = host.ports.get(&port).ok_or(Error::InvalidState)?;
        let that = host.ports.get(&other).ok_or(Error::InvalidState)?;
        if this.neutered || that.neutered {
            return Err(Error::InvalidState);
        }
        let current = this.entangled_port;
        if current == Some(other) {
            return Ok(());
        }

        let plan = Self::plan_entanglement(host, port, other)?;
        Self::disentangle(host, port);
        Self::disentangle(host, other);
        Self::commit_entanglement(host, plan);
        Ok(())
    }

    fn plan_entanglement(
        host: &ScriptHost,
        first: MessagePortId,
        second: MessagePortId,
    ) -> Fallible<EntanglementPlan> {
        let first_heap = host.ports.get(&first).ok_or(Error::InvalidState)?.heap;
        let second_heap = host.ports.get(&second).ok_or(Error::InvalidState)?.heap;
        if first_heap == second_heap {
            return Ok(EntanglementPlan {
                first,
                second,
                first_handle: None,
                second_handle: None,
            });
        }

        let first_global = host.globals.get(&first_heap).ok_or(Error::InvalidState)?;
        let second_global = host.globals.get(&second_heap).ok_or(Error::InvalidState)?;
        if !first_global.origin().same_origin(second_global.origin()) &&
            !host
                .embedder
                .security
                .allows_entanglement(first_global.origin(), second_global.origin())
        {
            warn!(
                "Refusing to entangle {} ({}) with {} ({})",
                first,
                first_global.origin().ascii_serialization(),
                second,
                second_global.origin().ascii_serialization()
            );
            return Err(Error::Security(None));
        }

        Ok(EntanglementPlan {
            first,
            second,
            first_handle: Some(CrossHeapHandle::new(first_global.keep_alive_table(), first)?),
            second_handle: Some(CrossHeapHandle::new(second_global.keep_alive_table(), second)?),
        })
    }

    fn commit_entanglement(host: &mut ScriptHost, plan: EntanglementPlan) {
        let EntanglementPlan {
            first,
            second,
            first_handle,
            second_handle,
        } = plan;
        let cross_heap = first_handle.is_some();
        for (port, peer, handle) in [(first, second, first_handle), (second, first, second_handle)] {
            if let Some(port) = host.ports.get_mut(&port) {
                port.entangled_port = Some(peer);
                port.keep_alive = handle;
                port.enabled = true;
            }
        }
        debug!(
            "Entangled {} with {}{}",
            first,
            second,
            if cross_heap { " across heaps" } else { "" }
        );
    }

    /// Break the entanglement on both sides. A no-op for an unentangled port.
    pub fn disentangle(host: &mut ScriptHost, port: MessagePortId) {
        let Some(this) = host.ports.get_mut(&port) else {
            return;
        };
        let Some(peer) = this.entangled_port.take() else {
            return;
        };
        this.keep_alive = None;
        if let Some(peer_port) = host.ports.get_mut(&peer) {
            if peer_port.entangled_port == Some(port) {
                peer_port.entangled_port = None;
                peer_port.keep_alive = None;
                peer_port.forwarding_port = None;
            }
        }
        debug!("Disentangled {} from {}", port, peer);
    }

    /// Unlink `port` from its peer without touching the peer's alias; the
    /// peer is about to be entangled with the port replacing `port`.
    fn detach_for_transfer(host: &mut ScriptHost, port: MessagePortId) {
        let Some(this) = host.ports.get_mut(&port) else {
            return;
        };
        let Some(peer) = this.entangled_port.take() else {
            return;
        };
        this.keep_alive = None;
        if let Some(peer_port) = host.ports.get_mut(&peer) {
            if peer_port.entangled_port == Some(port) {
                peer_port.entangled_port = None;
                peer_port.keep_alive = None;
            }
        }
    }

    /// Hand `port`'s queued events and entanglement over to `new_port`,
    /// leaving `port` neutered. Either the whole hand-off happens or nothing
    /// changes.
    pub fn transfer(
        host: &mut ScriptHost,
        port: MessagePortId,
        new_port: MessagePortId,
        new_owner: Option<WorkerId>,
    ) -> ErrorResult {
        let pairs = [(port, new_port)];
        let plans = Self::plan_transfers(host, &pairs)?;
        Self::complete_transfers(host, &pairs, plans, new_owner);
        Ok(())
    }

    /// Plan the entanglements a batch of transfers will need. A peer that is
    /// itself moving in the same batch is entangled with its replacement.
    pub(crate) fn plan_transfers(
        host: &ScriptHost,
        pairs: &[(MessagePortId, MessagePortId)],
    ) -> Fallible<Vec<EntanglementPlan>> {
        let replacements: HashMap<MessagePortId, MessagePortId> = pairs.iter().copied().collect();
        let mut planned: HashSet<MessagePortId> = HashSet::new();
        let mut plans: Vec<EntanglementPlan> = Vec::new();
        for &(source, new_port) in pairs {
            let port = host.ports.get(&source).ok_or(Error::InvalidState)?;
            if port.neutered || !host.ports.contains_key(&new_port) {
                return Err(Error::InvalidState);
            }
            let Some(peer) = port.entangled_port else {
                continue;
            };
            match replacements.get(&peer).copied() {
                Some(_) if planned.contains(&new_port) => {},
                Some(new_peer) => {
                    plans.push(Self::plan_entanglement(host, new_port, new_peer)?);
                    planned.insert(new_peer);
                },
                None => plans.push(Self::plan_entanglement(host, new_port, peer)?),
            }
        }
        Ok(plans)
    }

    pub(crate) fn complete_transfers(
        host: &mut ScriptHost,
        pairs: &[(MessagePortId, MessagePortId)],
        plans: Vec<EntanglementPlan>,
        new_owner: Option<WorkerId>,
    ) {
        for &(source, new_port) in pairs {
            // Step 1: the original port stops working for good.
            let mut pending = match host.ports.get_mut(&source) {
                Some(port) => {
                    port.enabled = false;
                    port.neutered = true;
                    std::mem::take(&mut port.message_queue)
                },
                None => continue,
            };

            // Step 2: events that were waiting for a listener follow the port.
            if let Some(port) = host.ports.get_mut(&new_port) {
                pending.move_to(&mut port.message_queue, EventTargetId::MessagePort(new_port));
                port.owner = new_owner;
            }

            // Step 3
            if let Some(owner) = new_owner.and_then(|owner| host.workers.get_mut(&owner)) {
                owner.adopt_new_port(new_port);
            }
            debug!("Transferred {} to {}", source, new_port);
        }

        // Step 4
        for &(source, _) in pairs {
            Self::detach_for_transfer(host, source);
        }
        for plan in plans {
            Self::commit_entanglement(host, plan);
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageport-postmessage>
    pub fn post_message(
        host: &mut ScriptHost,
        port: MessagePortId,
        message: &ScriptValue,
        transfer: Option<&ScriptValue>,
    ) -> Fallible<Continuation> {
        let (heap, target) = {
            let this = host.ports.get(&port).ok_or(Error::InvalidState)?;
            if !this.enabled || this.neutered {
                return Err(Error::InvalidState);
            }
            (this.heap, this.entangled_port.ok_or(Error::InvalidState)?)
        };
        let target_heap = host.ports.get(&target).ok_or(Error::InvalidState)?.heap;
        let new_owner = host.globals.get(&target_heap).and_then(|global| global.worker());

        let (data, ports) = structuredclone::write_with_transfer(
            host,
            message,
            transfer,
            &CloneEndpoints {
                source_heap: heap,
                source_port: Some(port),
                target_port: Some(target),
                target_heap,
                new_owner,
                location: "MessagePort.postMessage",
            },
        )?;

        // Both ends must still be connected to each other once the payload
        // has been moved.
        match host.ports.get(&port) {
            Some(this) if this.enabled && this.entangled_port == Some(target) => {},
            _ => return Err(Error::InvalidState),
        }
        if host.ports.get(&target).and_then(|port| port.entangled_port) != Some(port) {
            return Err(Error::InvalidAccess);
        }

        let origin = host
            .globals
            .get(&heap)
            .map(|global| global.origin().ascii_serialization())
            .unwrap_or_default();
        Self::send_message(host, target, MessageEvent::new(data, origin, None, ports))?;

        Ok(if heap == target_heap {
            Continuation::Proceed
        } else {
            Continuation::Yield
        })
    }

    fn send_message(host: &mut ScriptHost, target: MessagePortId, message: MessageEvent) -> ErrorResult {
        let recipient = match host.ports.get(&target).and_then(|port| port.forwarding_port) {
            Some(alias) if host.ports.contains_key(&alias) => alias,
            _ => target,
        };
        let event = Event::new_message(
            EventType::Message,
            EventTargetId::MessagePort(recipient),
            message,
        );
        deliver_event(host, EventQueueId::MessagePort(recipient), event)
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageport-start>
    pub fn start(host: &mut ScriptHost, port: MessagePortId) -> ErrorResult {
        let this = host.ports.get_mut(&port).ok_or(Error::InvalidState)?;
        if this.neutered {
            return Ok(());
        }
        this.enabled = true;
        drain_event_queue(host, EventQueueId::MessagePort(port))
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-messageport-close>
    pub fn close(host: &mut ScriptHost, port: MessagePortId) -> ErrorResult {
        if !host.ports.get(&port).ok_or(Error::InvalidState)?.enabled {
            return Err(Error::InvalidState);
        }
        Self::disentangle(host, port);
        if let Some(this) = host.ports.get_mut(&port) {
            this.forwarding_port = None;
            this.enabled = false;
        }
        Ok(())
    }

    /// <https://html.spec.whatwg.org/multipage/#handler-messageport-onmessage>
    ///
    /// Setting a handler implicitly starts the port.
    pub fn set_onmessage(
        host: &mut ScriptHost,
        port: MessagePortId,
        handler: Option<EventListener>,
    ) -> ErrorResult {
        let start = handler.is_some();
        host.ports
            .get_mut(&port)
            .ok_or(Error::InvalidState)?
            .eventtarget
            .set_event_handler(EventType::Message, handler);
        if start {
            Self::start(host, port)?;
        }
        Ok(())
    }

    /// Route deliveries for `port` to `alias`, which must live in the same
    /// heap. `None` removes the alias.
    pub fn set_forwarding_port(
        host: &mut ScriptHost,
        port: MessagePortId,
        alias: Option<MessagePortId>,
    ) -> ErrorResult {
        let heap = host.ports.get(&port).ok_or(Error::InvalidState)?.heap;
        if let Some(alias) = alias {
            match host.ports.get(&alias) {
                Some(alias_port) if alias_port.heap == heap && alias != port => {},
                _ => return Err(Error::InvalidAccess),
            }
        }
        if let Some(this) = host.ports.get_mut(&port) {
            this.forwarding_port = alias;
        }
        Ok(())
    }

    /// Remove a port for good, disentangling it and dropping it from every
    /// list that refers to it.
    pub(crate) fn destroy(host: &mut ScriptHost, port: MessagePortId) {
        Self::disentangle(host, port);
        let Some(this) = host.ports.remove(&port) else {
            return;
        };
        if let Some(owner) = this.owner.and_then(|owner| host.workers.get_mut(&owner)) {
            owner.remove_entangled_port(port);
        }
        if let Some(global) = host.globals.get_mut(&this.heap) {
            global.untrack_message_port(port);
        }
        for other in host.ports.values_mut() {
            if other.forwarding_port == Some(port) {
                other.forwarding_port = None;
            }
        }
        debug!("Destroyed {}", port);
    }
}
