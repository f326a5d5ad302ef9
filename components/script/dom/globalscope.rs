/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::HashMap;
use std::rc::Rc;

use base::id::{HeapId, MessagePortId, WorkerDomainId, WorkerId};
use ferry_url::{FerryUrl, ImmutableOrigin};

use crate::dom::bindings::crossheap::KeepAliveTable;
use crate::dom::bindings::error::ErrorResult;
use crate::dom::workercontroller::WorkerController;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GlobalScopeKind {
    Window,
    DedicatedWorker,
    SharedWorker,
}

/// An execution context with its own heap: a document's window or the
/// environment a worker runs in.
pub struct GlobalScope {
    heap: HeapId,
    kind: GlobalScopeKind,
    creation_url: FerryUrl,
    origin: ImmutableOrigin,

    /// Ports kept alive here because their entangled port lives elsewhere.
    keep_alive: Rc<KeepAliveTable<MessagePortId>>,

    /// Every port created in this heap.
    message_ports: Vec<MessagePortId>,

    /// Ports script holds a reference to, with a count per reference.
    rooted_ports: HashMap<MessagePortId, usize>,

    /// The workers this context started or connected to.
    worker_controller: WorkerController,

    /// The worker running in this heap, for worker globals.
    worker: Option<WorkerId>,
    /// The domain that owns this heap, for worker globals.
    domain: Option<WorkerDomainId>,

    /// Set while the global is being torn down.
    destroying: bool,
}

impl GlobalScope {
    pub(crate) fn new_inherited(kind: GlobalScopeKind, creation_url: FerryUrl) -> GlobalScope {
        let origin = creation_url.origin();
        GlobalScope {
            heap: HeapId::new(),
            kind,
            creation_url,
            origin,
            keep_alive: Rc::default(),
            message_ports: Vec::new(),
            rooted_ports: HashMap::new(),
            worker_controller: WorkerController::default(),
            worker: None,
            domain: None,
            destroying: false,
        }
    }

    pub fn heap_id(&self) -> HeapId {
        self.heap
    }

    pub fn kind(&self) -> GlobalScopeKind {
        self.kind
    }

    pub fn is_worker_global(&self) -> bool {
        self.kind != GlobalScopeKind::Window
    }

    /// <https://html.spec.whatwg.org/multipage/#concept-environment-creation-url>
    pub fn creation_url(&self) -> &FerryUrl {
        &self.creation_url
    }

    /// <https://html.spec.whatwg.org/multipage/#concept-settings-object-origin>
    pub fn origin(&self) -> &ImmutableOrigin {
        &self.origin
    }

    pub fn keep_alive_table(&self) -> &Rc<KeepAliveTable<MessagePortId>> {
        &self.keep_alive
    }

    pub fn message_ports(&self) -> &[MessagePortId] {
        &self.message_ports
    }

    pub(crate) fn track_message_port(&mut self, port: MessagePortId) -> ErrorResult {
        self.message_ports.try_reserve(1)?;
        self.message_ports.push(port);
        Ok(())
    }

    pub(crate) fn untrack_message_port(&mut self, port: MessagePortId) {
        self.message_ports.retain(|tracked| *tracked != port);
        self.rooted_ports.remove(&port);
    }

    pub fn is_rooted(&self, port: MessagePortId) -> bool {
        self.rooted_ports.contains_key(&port)
    }

    pub fn rooted_ports(&self) -> impl Iterator<Item = MessagePortId> + '_ {
        self.rooted_ports.keys().copied()
    }

    pub(crate) fn root_port(&mut self, port: MessagePortId) -> ErrorResult {
        self.rooted_ports.try_reserve(1)?;
        *self.rooted_ports.entry(port).or_insert(0) += 1;
        Ok(())
    }

    /// Drop one script reference to `port`.
    pub(crate) fn unroot_port(&mut self, port: MessagePortId) {
        if let Some(count) = self.rooted_ports.get_mut(&port) {
            *count -= 1;
            if *count == 0 {
                self.rooted_ports.remove(&port);
            }
        }
    }

    pub fn worker_controller(&self) -> &WorkerController {
        &self.worker_controller
    }

    pub(crate) fn worker_controller_mut(&mut self) -> &mut WorkerController {
        &mut self.worker_controller
    }

    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    pub(crate) fn set_worker(&mut self, worker: WorkerId) {
        self.worker = Some(worker);
    }

    pub fn domain(&self) -> Option<WorkerDomainId> {
        self.domain
    }

    pub(crate) fn set_domain(&mut self, domain: WorkerDomainId) {
        self.domain = Some(domain);
    }

    pub fn is_destroying(&self) -> bool {
        self.destroying
    }

    pub(crate) fn set_destroying(&mut self) {
        self.destroying = true;
    }
}
