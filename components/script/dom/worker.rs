/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::{HeapId, MessagePortId, WorkerDomainId, WorkerId, WorkerObjectId};
use ferry_url::FerryUrl;
use log::{debug, warn};
use script_traits::{ConsoleMessage, ConsoleMessageSource, ScriptValue};

use crate::dom::abstractworker::WorkerKind;
use crate::dom::bindings::error::{Error, ErrorResult, Fallible};
use crate::dom::bindings::structuredclone::{self, CloneEndpoints};
use crate::dom::event::{Event, EventTargetId, EventType};
use crate::dom::eventqueue::{EventQueue, EventQueueId, WorkerQueue, deliver_event, drain_event_queue};
use crate::dom::eventtarget::{EventListener, EventTarget};
use crate::dom::messageevent::MessageEvent;
use crate::dom::messageport::MessagePort;
use crate::dom::workercontroller::WorkerController;
use crate::dom::workerdomain::WorkerDomain;
use crate::dom::workerglobalscope::WorkerGlobalScope;
use crate::dom::workermanager::WorkerManager;
use crate::script_runtime::{Continuation, ScriptHost};

/// <https://html.spec.whatwg.org/multipage/#worker>
///
/// The outside of a worker, living in the context that constructed it. For a
/// shared worker this is the `SharedWorker` object of one connection.
pub struct Worker {
    eventtarget: EventTarget,
    id: WorkerObjectId,
    heap: HeapId,
    kind: WorkerKind,
    script_url: FerryUrl,
    /// Cleared when the worker closes.
    worker: Option<WorkerId>,
    /// <https://html.spec.whatwg.org/multipage/#dom-sharedworker-port>
    port: Option<MessagePortId>,
    message_queue: EventQueue,
    error_queue: EventQueue,
}

impl Worker {
    fn new_inherited(
        id: WorkerObjectId,
        heap: HeapId,
        kind: WorkerKind,
        script_url: FerryUrl,
        worker: WorkerId,
    ) -> Worker {
        Worker {
            eventtarget: EventTarget::default(),
            id,
            heap,
            kind,
            script_url,
            worker: Some(worker),
            port: None,
            message_queue: EventQueue::default(),
            error_queue: EventQueue::default(),
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-worker>
    /// <https://html.spec.whatwg.org/multipage/#dom-sharedworker>
    pub fn construct(
        host: &mut ScriptHost,
        owner: HeapId,
        script_url: &str,
        kind: WorkerKind,
    ) -> Fallible<WorkerObjectId> {
        let (base, origin) = match host.global(owner) {
            Some(global) if !global.is_destroying() => {
                (global.creation_url().clone(), global.origin().clone())
            },
            _ => return Err(Error::InvalidState),
        };

        // Step 1: resolve the script URL against the owner.
        let url = FerryUrl::parse_with_base(Some(&base), script_url).map_err(|_| Error::Syntax)?;

        // Step 2
        if !host.embedder.security.allows_worker_script(&origin, &url) {
            warn!("Refusing worker script {} for {}", url, origin.ascii_serialization());
            return Err(Error::Security(None));
        }

        // Step 3: a shared worker with this URL and name may already run.
        let existing = match &kind {
            WorkerKind::Shared(name) => WorkerManager::find_worker_domain(host, &url, name),
            WorkerKind::Dedicated => None,
        };
        let (domain, worker, is_new, joined) = match existing {
            Some(domain) => {
                let (worker, already_owner) = host
                    .domains
                    .get(&domain)
                    .and_then(|domain| {
                        let worker = domain.workers().first().copied()?;
                        Some((worker, domain.owners().contains(&owner)))
                    })
                    .ok_or(Error::InvalidState)?;
                WorkerDomain::add_domain_owner(host, domain, owner)?;
                WorkerController::add_domain(host, owner, domain, false)?;
                debug!("Connecting to running {}", worker);
                (domain, worker, false, !already_owner)
            },
            None => {
                Self::check_quota(host, owner, &base)?;
                let (domain, worker) = WorkerDomain::make(host, owner, url.clone(), kind.clone())?;
                (domain, worker, true, true)
            },
        };

        let object = WorkerObjectId::new();
        host.worker_objects.insert(
            object,
            Worker::new_inherited(object, owner, kind, url, worker),
        );

        if let Err(error) = Self::connect(host, owner, object, domain, worker, is_new) {
            Self::release(host, object);
            if is_new {
                WorkerGlobalScope::terminate(host, worker);
            } else if joined {
                WorkerController::remove_domain(host, owner, domain);
                WorkerDomain::detach(host, domain, owner);
            }
            return Err(error);
        }
        Ok(object)
    }

    fn check_quota(host: &ScriptHost, owner: HeapId, owner_url: &FerryUrl) -> ErrorResult {
        let per_context = host.limits.max_per_context();
        let per_session = host.limits.max_per_session();
        let allowed_here = host
            .global(owner)
            .is_some_and(|global| global.worker_controller().allow_new_worker_context(per_context));
        let limit = if !allowed_here {
            per_context
        } else if !host.manager.can_create_worker(per_session) {
            per_session
        } else {
            return Ok(());
        };

        host.post_console_message(ConsoleMessage {
            source: ConsoleMessageSource::WorkerQuota,
            message: format!("Maximum number of Web Worker instances({}) exceeded.", limit),
            url: owner_url.to_string(),
            line: 0,
        });
        Err(Error::QuotaExceeded)
    }

    /// Link a freshly made object to its worker, open the shared worker
    /// port, and start loading a new worker's script.
    fn connect(
        host: &mut ScriptHost,
        owner: HeapId,
        object: WorkerObjectId,
        domain: WorkerDomainId,
        worker: WorkerId,
        is_new: bool,
    ) -> ErrorResult {
        host.global_mut(owner)
            .ok_or(Error::InvalidState)?
            .worker_controller_mut()
            .add_worker_object(object)?;
        host.workers
            .get_mut(&worker)
            .ok_or(Error::InvalidState)?
            .add_connected_object(object)?;

        let shared = host
            .domains
            .get(&domain)
            .is_some_and(|domain| !domain.is_dedicated());
        if !shared {
            if let Some(parent) = host.worker_in_heap(owner) {
                WorkerGlobalScope::adopt_child(host, parent, worker)?;
            }
        } else {
            let port_out = MessagePort::new(host, owner)?;
            if let Some(this) = host.worker_objects.get_mut(&object) {
                this.port = Some(port_out);
            }
            host.root_port(owner, port_out)?;
            WorkerGlobalScope::register_connection(host, worker, port_out)?;
        }

        if is_new {
            WorkerGlobalScope::load_initial_script(host, worker)?;
        }
        Ok(())
    }

    pub fn id(&self) -> WorkerObjectId {
        self.id
    }

    /// The context this object lives in.
    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    pub fn script_url(&self) -> &FerryUrl {
        &self.script_url
    }

    /// The worker behind this object, until it closes.
    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    pub fn port(&self) -> Option<MessagePortId> {
        self.port
    }

    pub fn eventtarget(&self) -> &EventTarget {
        &self.eventtarget
    }

    pub(crate) fn eventtarget_mut(&mut self) -> &mut EventTarget {
        &mut self.eventtarget
    }

    pub fn queue(&self, queue: WorkerQueue) -> Option<&EventQueue> {
        match queue {
            WorkerQueue::Message => Some(&self.message_queue),
            WorkerQueue::Error => Some(&self.error_queue),
            WorkerQueue::Connect => None,
        }
    }

    pub(crate) fn queue_mut(&mut self, queue: WorkerQueue) -> Option<&mut EventQueue> {
        match queue {
            WorkerQueue::Message => Some(&mut self.message_queue),
            WorkerQueue::Error => Some(&mut self.error_queue),
            WorkerQueue::Connect => None,
        }
    }

    pub(crate) fn clear_worker(&mut self) {
        self.worker = None;
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-worker-postmessage>
    ///
    /// Messages to a worker that has gone away are dropped silently.
    pub fn post_message(
        host: &mut ScriptHost,
        object: WorkerObjectId,
        message: &ScriptValue,
        transfer: Option<&ScriptValue>,
    ) -> Fallible<Continuation> {
        let (heap, worker) = {
            let this = host.worker_objects.get(&object).ok_or(Error::InvalidState)?;
            if this.kind.is_shared() {
                return Err(Error::NotSupported);
            }
            (this.heap, this.worker)
        };
        let target_heap = match worker.and_then(|worker| host.workers.get(&worker)) {
            Some(inside) if !inside.is_closed() => inside.heap(),
            _ => return Ok(Continuation::Proceed),
        };
        let Some(worker) = worker else {
            return Ok(Continuation::Proceed);
        };

        let (data, ports) = structuredclone::write_with_transfer(
            host,
            message,
            transfer,
            &CloneEndpoints {
                source_heap: heap,
                source_port: None,
                target_port: None,
                target_heap,
                new_owner: Some(worker),
                location: "Worker.postMessage",
            },
        )?;
        let origin = host
            .global(heap)
            .map(|global| global.origin().ascii_serialization())
            .unwrap_or_default();
        let event = Event::new_message(
            EventType::Message,
            EventTargetId::WorkerGlobalScope(worker),
            MessageEvent::new(data, origin, None, ports),
        );
        deliver_event(
            host,
            EventQueueId::WorkerGlobalScope(worker, WorkerQueue::Message),
            event,
        )?;
        WorkerGlobalScope::drain_event_queues(host, worker)?;
        Ok(Continuation::Yield)
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-worker-terminate>
    pub fn terminate(host: &mut ScriptHost, object: WorkerObjectId) -> ErrorResult {
        let this = host.worker_objects.get(&object).ok_or(Error::InvalidState)?;
        if this.kind.is_shared() {
            return Err(Error::NotSupported);
        }
        if let Some(worker) = this.worker {
            WorkerGlobalScope::terminate(host, worker);
        }
        Ok(())
    }

    pub fn add_event_listener(
        host: &mut ScriptHost,
        object: WorkerObjectId,
        type_: EventType,
        listener: EventListener,
    ) -> ErrorResult {
        host.worker_objects
            .get_mut(&object)
            .ok_or(Error::InvalidState)?
            .eventtarget
            .add_event_listener(type_, listener);
        Self::drain_for(host, object, type_)
    }

    /// Set `onmessage` or `onerror`.
    pub fn set_event_handler(
        host: &mut ScriptHost,
        object: WorkerObjectId,
        type_: EventType,
        handler: Option<EventListener>,
    ) -> ErrorResult {
        let listening = handler.is_some();
        host.worker_objects
            .get_mut(&object)
            .ok_or(Error::InvalidState)?
            .eventtarget
            .set_event_handler(type_, handler);
        if listening {
            Self::drain_for(host, object, type_)?;
        }
        Ok(())
    }

    fn drain_for(host: &mut ScriptHost, object: WorkerObjectId, type_: EventType) -> ErrorResult {
        let queue = match type_ {
            EventType::Message => WorkerQueue::Message,
            EventType::Error => WorkerQueue::Error,
            EventType::Connect => return Ok(()),
        };
        drain_event_queue(host, EventQueueId::Worker(object, queue))
    }

    /// Unlink and drop an outside object. Its worker keeps running; a shared
    /// worker port is left for the collector.
    pub(crate) fn release(host: &mut ScriptHost, object: WorkerObjectId) {
        let Some(this) = host.worker_objects.remove(&object) else {
            return;
        };
        if let Some(worker) = this.worker.and_then(|worker| host.workers.get_mut(&worker)) {
            worker.remove_connected_object(object);
        }
        if let Some(global) = host.global_mut(this.heap) {
            global.worker_controller_mut().remove_worker_object(object);
            if let Some(port) = this.port {
                global.unroot_port(port);
            }
        }
        debug!("Released {}", object);
    }
}
