/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::collections::VecDeque;

use base::id::{HeapId, MessagePortId, WorkerDomainId, WorkerId, WorkerObjectId};
use ferry_url::FerryUrl;
use log::{debug, warn};
use script_traits::{ConsoleMessage, ConsoleMessageSource, ExceptionSignature, ScriptError, ScriptValue};

use crate::dom::abstractworker::{WorkerInfo, WorkerKind};
use crate::dom::bindings::error::{Error, ErrorResult, Fallible};
use crate::dom::bindings::structuredclone::{self, CloneEndpoints};
use crate::dom::errorevent::ErrorEvent;
use crate::dom::event::{Event, EventStatus, EventTargetId, EventType};
use crate::dom::eventdispatcher::dispatch_event;
use crate::dom::eventqueue::{EventQueue, EventQueueId, WorkerQueue, deliver_event, drain_event_queue};
use crate::dom::eventtarget::{EventListener, EventTarget};
use crate::dom::messageevent::MessageEvent;
use crate::dom::messageport::MessagePort;
use crate::dom::workerdomain::WorkerDomain;
use crate::script_loader::{ActiveLoader, LoadPurpose};
use crate::script_runtime::{Continuation, ScriptHost};

/// <https://html.spec.whatwg.org/multipage/#workerglobalscope>
///
/// The inside of a worker, living in the worker's own heap.
pub struct WorkerGlobalScope {
    eventtarget: EventTarget,
    worker_id: WorkerId,
    heap: HeapId,
    domain: WorkerDomainId,
    kind: WorkerKind,
    worker_url: FerryUrl,

    /// The outside objects connected to this worker. A dedicated worker has
    /// at most one.
    connected: Vec<WorkerObjectId>,
    parent: Option<WorkerId>,
    children: Vec<WorkerId>,
    /// Ports in this heap that die with the worker.
    entangled_ports: Vec<MessagePortId>,

    message_queue: EventQueue,
    error_queue: EventQueue,
    connect_queue: EventQueue,

    /// Set once the initial script has run; queued events wait until then.
    enabled: bool,
    /// <https://html.spec.whatwg.org/multipage/#dom-workerglobalscope-closing>
    closed: bool,

    /// Signatures of exceptions currently travelling up from this worker.
    processing_errors: Vec<ExceptionSignature>,
    pub(crate) active_loaders: Vec<ActiveLoader>,
}

const WORKER_QUEUES: [(EventType, WorkerQueue); 3] = [
    (EventType::Message, WorkerQueue::Message),
    (EventType::Error, WorkerQueue::Error),
    (EventType::Connect, WorkerQueue::Connect),
];

impl WorkerGlobalScope {
    pub(crate) fn new_inherited(
        worker_id: WorkerId,
        heap: HeapId,
        domain: WorkerDomainId,
        kind: WorkerKind,
        worker_url: FerryUrl,
    ) -> WorkerGlobalScope {
        WorkerGlobalScope {
            eventtarget: EventTarget::default(),
            worker_id,
            heap,
            domain,
            kind,
            worker_url,
            connected: Vec::new(),
            parent: None,
            children: Vec::new(),
            entangled_ports: Vec::new(),
            message_queue: EventQueue::default(),
            error_queue: EventQueue::default(),
            connect_queue: EventQueue::default(),
            enabled: false,
            closed: false,
            processing_errors: Vec::new(),
            active_loaders: Vec::new(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    pub fn heap(&self) -> HeapId {
        self.heap
    }

    pub fn domain(&self) -> WorkerDomainId {
        self.domain
    }

    pub fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    /// <https://html.spec.whatwg.org/multipage/#concept-workerglobalscope-url>
    pub fn worker_url(&self) -> &FerryUrl {
        &self.worker_url
    }

    pub fn connected_objects(&self) -> &[WorkerObjectId] {
        &self.connected
    }

    pub fn parent(&self) -> Option<WorkerId> {
        self.parent
    }

    pub fn children(&self) -> &[WorkerId] {
        &self.children
    }

    pub fn entangled_ports(&self) -> &[MessagePortId] {
        &self.entangled_ports
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether an `importScripts()` call is waiting for its scripts.
    pub fn is_blocked(&self) -> bool {
        self.active_loaders
            .iter()
            .any(|loader| loader.purpose() == LoadPurpose::Import)
    }

    pub fn is_processing_exception(&self, signature: &ExceptionSignature) -> bool {
        self.processing_errors.contains(signature)
    }

    pub fn eventtarget(&self) -> &EventTarget {
        &self.eventtarget
    }

    pub(crate) fn eventtarget_mut(&mut self) -> &mut EventTarget {
        &mut self.eventtarget
    }

    pub(crate) fn queue_mut(&mut self, queue: WorkerQueue) -> &mut EventQueue {
        match queue {
            WorkerQueue::Message => &mut self.message_queue,
            WorkerQueue::Error => &mut self.error_queue,
            WorkerQueue::Connect => &mut self.connect_queue,
        }
    }

    pub fn queue(&self, queue: WorkerQueue) -> &EventQueue {
        match queue {
            WorkerQueue::Message => &self.message_queue,
            WorkerQueue::Error => &self.error_queue,
            WorkerQueue::Connect => &self.connect_queue,
        }
    }

    pub(crate) fn add_entangled_port(&mut self, port: MessagePortId) {
        if !self.entangled_ports.contains(&port) {
            self.entangled_ports.push(port);
        }
    }

    /// Take a port that a transfer has just created for this worker, so it
    /// cannot be listed yet.
    pub(crate) fn adopt_new_port(&mut self, port: MessagePortId) {
        self.entangled_ports.push(port);
    }

    pub(crate) fn remove_entangled_port(&mut self, port: MessagePortId) {
        self.entangled_ports.retain(|known| *known != port);
    }

    pub(crate) fn add_connected_object(&mut self, object: WorkerObjectId) -> ErrorResult {
        if !self.connected.contains(&object) {
            self.connected.try_reserve(1)?;
            self.connected.push(object);
        }
        Ok(())
    }

    pub(crate) fn remove_connected_object(&mut self, object: WorkerObjectId) {
        self.connected.retain(|known| *known != object);
    }

    pub fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.worker_id,
            url: self.worker_url.clone(),
            kind: self.kind.clone(),
            enabled: self.enabled,
            closed: self.closed,
            parent: self.parent,
            children: self.children.len(),
            connections: self.connected.len(),
            entangled_ports: self.entangled_ports.len(),
            pending_loads: self.active_loaders.len(),
        }
    }

    /// Make `child` a child of `parent`: closing the parent closes it too.
    pub(crate) fn adopt_child(host: &mut ScriptHost, parent: WorkerId, child: WorkerId) -> ErrorResult {
        let parent_worker = host.workers.get_mut(&parent).ok_or(Error::InvalidState)?;
        if !parent_worker.children.contains(&child) {
            parent_worker.children.try_reserve(1)?;
            parent_worker.children.push(child);
        }
        if let Some(child_worker) = host.workers.get_mut(&child) {
            child_worker.parent = Some(parent);
        }
        Ok(())
    }

    /// Start receiving events. A no-op for a closed or already enabled
    /// worker.
    pub fn enable(host: &mut ScriptHost, worker: WorkerId) -> ErrorResult {
        match host.workers.get_mut(&worker) {
            Some(this) if !this.closed && !this.enabled => this.enabled = true,
            _ => return Ok(()),
        }
        debug!("Enabled {}", worker);
        Self::drain_event_queues(host, worker)
    }

    /// Drain every queue that has somebody listening, once the worker is
    /// enabled.
    pub(crate) fn drain_event_queues(host: &mut ScriptHost, worker: WorkerId) -> ErrorResult {
        let queues: Vec<WorkerQueue> = match host.workers.get(&worker) {
            Some(this) if this.enabled && !this.closed => WORKER_QUEUES
                .iter()
                .filter(|(type_, _)| this.eventtarget.has_listeners_for(*type_))
                .map(|(_, queue)| *queue)
                .collect(),
            _ => return Ok(()),
        };
        for queue in queues {
            drain_event_queue(host, EventQueueId::WorkerGlobalScope(worker, queue))?;
        }
        Ok(())
    }

    pub fn add_event_listener(
        host: &mut ScriptHost,
        worker: WorkerId,
        type_: EventType,
        listener: EventListener,
    ) -> ErrorResult {
        host.workers
            .get_mut(&worker)
            .ok_or(Error::InvalidState)?
            .eventtarget
            .add_event_listener(type_, listener);
        Self::drain_event_queues(host, worker)
    }

    /// Set `onmessage`, `onerror` or `onconnect`.
    pub fn set_event_handler(
        host: &mut ScriptHost,
        worker: WorkerId,
        type_: EventType,
        handler: Option<EventListener>,
    ) -> ErrorResult {
        host.workers
            .get_mut(&worker)
            .ok_or(Error::InvalidState)?
            .eventtarget
            .set_event_handler(type_, handler);
        Self::drain_event_queues(host, worker)
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-dedicatedworkerglobalscope-postmessage>
    pub fn post_message(
        host: &mut ScriptHost,
        worker: WorkerId,
        message: &ScriptValue,
        transfer: Option<&ScriptValue>,
    ) -> Fallible<Continuation> {
        let (heap, object) = {
            let this = host.workers.get(&worker).ok_or(Error::InvalidState)?;
            if this.closed {
                debug!("postMessage() on closed worker");
                return Err(Error::InvalidState);
            }
            if this.kind.is_shared() {
                return Err(Error::NotSupported);
            }
            (this.heap, this.connected.first().copied())
        };
        let Some(object) = object else {
            return Ok(Continuation::Proceed);
        };
        let target_heap = host
            .worker_objects
            .get(&object)
            .ok_or(Error::InvalidState)?
            .heap();

        let (data, ports) = structuredclone::write_with_transfer(
            host,
            message,
            transfer,
            &CloneEndpoints {
                source_heap: heap,
                source_port: None,
                target_port: None,
                target_heap,
                new_owner: host.worker_in_heap(target_heap),
                location: "DedicatedWorkerGlobalScope.postMessage",
            },
        )?;
        let origin = host
            .global(heap)
            .map(|global| global.origin().ascii_serialization())
            .unwrap_or_default();
        let event = Event::new_message(
            EventType::Message,
            EventTargetId::Worker(object),
            MessageEvent::new(data, origin, None, ports),
        );
        deliver_event(host, EventQueueId::Worker(object, WorkerQueue::Message), event)?;
        Ok(Continuation::Yield)
    }

    /// Accept a new connection to a shared worker: a port in this heap
    /// entangled with `port_out` arrives with a `connect` event.
    pub(crate) fn register_connection(
        host: &mut ScriptHost,
        worker: WorkerId,
        port_out: MessagePortId,
    ) -> ErrorResult {
        let heap = host.workers.get(&worker).ok_or(Error::InvalidState)?.heap;
        let proxy = MessagePort::new(host, heap)?;
        if let Err(error) = MessagePort::entangle(host, proxy, port_out) {
            MessagePort::destroy(host, proxy);
            return Err(error);
        }
        if let Some(port) = host.ports.get_mut(&proxy) {
            port.set_owner(Some(worker));
        }
        if let Some(this) = host.workers.get_mut(&worker) {
            this.add_entangled_port(proxy);
        }

        let event = Event::new_message(
            EventType::Connect,
            EventTargetId::WorkerGlobalScope(worker),
            MessageEvent::new(
                ScriptValue::String(String::new()),
                String::new(),
                Some(EventTargetId::MessagePort(proxy)),
                vec![proxy],
            ),
        );
        deliver_event(
            host,
            EventQueueId::WorkerGlobalScope(worker, WorkerQueue::Connect),
            event,
        )?;
        Self::drain_event_queues(host, worker)
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-workerglobalscope-importscripts>
    ///
    /// Every URL is checked before anything is fetched. The caller stays
    /// blocked until the scripts have run in order.
    pub fn import_scripts(
        host: &mut ScriptHost,
        worker: WorkerId,
        urls: &[ScriptValue],
    ) -> Fallible<Continuation> {
        let (heap, base) = {
            let this = host.workers.get(&worker).ok_or(Error::InvalidState)?;
            if this.closed {
                return Err(Error::InvalidState);
            }
            (this.heap, this.worker_url.clone())
        };
        let origin = host.global(heap).ok_or(Error::InvalidState)?.origin().clone();

        let mut resolved = VecDeque::new();
        for argument in urls {
            let ScriptValue::String(input) = argument else {
                return Err(Error::Type("Expecting string argument".to_owned()));
            };
            let url = base.join(input).map_err(|_| Error::Syntax)?;
            if !host.embedder.security.allows_worker_script(&origin, &url) {
                return Err(Error::Security(Some(format!(
                    "Security error importing script: {}",
                    url
                ))));
            }
            resolved.try_reserve(1)?;
            resolved.push_back(url);
        }

        let Some(first) = resolved.pop_front() else {
            return Ok(Continuation::Proceed);
        };
        let loader = ActiveLoader::start(host, LoadPurpose::Import, first, resolved, heap);
        if let Some(this) = host.workers.get_mut(&worker) {
            this.active_loaders.try_reserve(1)?;
            this.active_loaders.push(loader);
        }
        Ok(Continuation::Block)
    }

    /// Issue the load of the worker's own script. A load that has already
    /// failed by the time it is issued is reported to the caller.
    pub(crate) fn load_initial_script(host: &mut ScriptHost, worker: WorkerId) -> ErrorResult {
        let (heap, url) = {
            let this = host.workers.get(&worker).ok_or(Error::InvalidState)?;
            (this.heap, this.worker_url.clone())
        };
        let mut loader = ActiveLoader::start(host, LoadPurpose::Initial, url, VecDeque::new(), heap);
        loader.check_immediate_failure()?;
        let this = host.workers.get_mut(&worker).ok_or(Error::InvalidState)?;
        this.active_loaders.try_reserve(1)?;
        this.active_loaders.push(loader);
        Ok(())
    }

    /// <https://html.spec.whatwg.org/multipage/#dom-workerglobalscope-close>
    pub fn close(host: &mut ScriptHost, worker: WorkerId) {
        Self::close_worker(host, worker);
    }

    /// <https://html.spec.whatwg.org/multipage/#terminate-a-worker>
    pub fn terminate(host: &mut ScriptHost, worker: WorkerId) {
        if let Some(this) = host.workers.get_mut(&worker) {
            this.eventtarget.clear_event_handlers();
        }
        Self::close_worker(host, worker);
    }

    /// Stop the worker for good: close its children, cut it loose from its
    /// parent and its outside objects, drop its ports and pending loads,
    /// and leave its domain. Safe to call more than once.
    pub(crate) fn close_worker(host: &mut ScriptHost, worker: WorkerId) {
        let (children, parent, connected, ports, domain) = match host.workers.get_mut(&worker) {
            Some(this) if !this.closed => {
                this.closed = true;
                this.enabled = false;
                // Dropping the receivers cancels the loads.
                this.active_loaders.clear();
                this.message_queue.clear();
                this.error_queue.clear();
                this.connect_queue.clear();
                (
                    std::mem::take(&mut this.children),
                    this.parent.take(),
                    std::mem::take(&mut this.connected),
                    std::mem::take(&mut this.entangled_ports),
                    this.domain,
                )
            },
            _ => return,
        };
        debug!("Closing {}", worker);

        for child in children {
            Self::terminate(host, child);
        }
        if let Some(parent) = parent.and_then(|parent| host.workers.get_mut(&parent)) {
            parent.children.retain(|child| *child != worker);
        }
        for object in connected {
            if let Some(object) = host.worker_objects.get_mut(&object) {
                object.clear_worker();
            }
        }
        for port in ports {
            MessagePort::destroy(host, port);
        }
        WorkerDomain::remove_web_worker(host, domain, worker);
    }

    /// <https://html.spec.whatwg.org/multipage/#report-the-error>
    ///
    /// Each exception is handled once while it is in flight; the same
    /// signature arriving again meanwhile is ignored.
    pub fn handle_error(host: &mut ScriptHost, worker: WorkerId, error: &ScriptError) {
        let signature = error.signature();
        if !Self::begin_processing(host, worker, &signature) {
            return;
        }
        Self::handle_exception(host, worker, error);
        Self::end_processing(host, worker, &signature);
    }

    /// Mark `signature` in flight at `worker`. False if it already was, or
    /// the worker is gone.
    fn begin_processing(host: &mut ScriptHost, worker: WorkerId, signature: &ExceptionSignature) -> bool {
        match host.workers.get_mut(&worker) {
            Some(this) if !this.closed && !this.processing_errors.contains(signature) => {
                this.processing_errors.push(signature.clone());
                true
            },
            _ => false,
        }
    }

    fn end_processing(host: &mut ScriptHost, worker: WorkerId, signature: &ExceptionSignature) {
        if let Some(this) = host.workers.get_mut(&worker) {
            this.processing_errors.retain(|processing| processing != signature);
        }
    }

    /// Offer the exception to the worker's own `onerror` first.
    fn handle_exception(host: &mut ScriptHost, worker: WorkerId, error: &ScriptError) {
        let has_listeners = host
            .workers
            .get(&worker)
            .is_some_and(|this| this.eventtarget.has_listeners_for(EventType::Error));
        if has_listeners {
            let event = Event::new_error(
                EventTargetId::WorkerGlobalScope(worker),
                ErrorEvent::from_script_error(error),
            );
            match dispatch_event(host, &event) {
                Ok(EventStatus::Canceled) => return,
                Ok(EventStatus::NotCanceled) => {},
                Err(failure) => warn!("Error event dispatch in {} failed: {}", worker, failure),
            }
        }
        Self::propagate_error_exception(host, worker, error);
    }

    /// Carry an unhandled exception outwards: a shared worker, or a worker
    /// whose parent is shared, reports to the console. A dedicated parent
    /// gets to handle it next. Otherwise the worker's outside object does,
    /// with the console as the last resort.
    fn propagate_error_exception(host: &mut ScriptHost, worker: WorkerId, error: &ScriptError) {
        let Some(this) = host.workers.get(&worker) else {
            return;
        };
        if this.kind.is_shared() {
            let url = this.worker_url.to_string();
            host.report_uncaught_error(url, error);
            return;
        }

        let parent = this.parent;
        let object = this.connected.first().copied();
        if let Some(parent) = parent {
            let Some(parent_worker) = host.workers.get(&parent) else {
                return;
            };
            if parent_worker.kind.is_shared() {
                let url = parent_worker.worker_url.to_string();
                host.report_uncaught_error(url, error);
                return;
            }
            let parent_listens = parent_worker.eventtarget.has_listeners_for(EventType::Error);
            // The parent handles the exception from here on; a rethrow from
            // its `onerror` is the same exception.
            let signature = error.signature();
            if !Self::begin_processing(host, parent, &signature) {
                return;
            }
            let canceled = parent_listens && {
                let event = Event::new_error(
                    EventTargetId::WorkerGlobalScope(parent),
                    ErrorEvent::from_script_error(error),
                );
                matches!(dispatch_event(host, &event), Ok(EventStatus::Canceled))
            };
            if !canceled {
                Self::propagate_error_exception(host, parent, error);
            }
            Self::end_processing(host, parent, &signature);
            return;
        }

        let url = match host.workers.get(&worker) {
            Some(this) => this.worker_url.to_string(),
            None => return,
        };
        let Some(object) = object else {
            host.report_uncaught_error(url, error);
            return;
        };

        let object_listens = host
            .worker_objects
            .get(&object)
            .is_some_and(|object| object.eventtarget().has_listeners_for(EventType::Error));
        if object_listens {
            let event = Event::new_error(EventTargetId::Worker(object), ErrorEvent::from_script_error(error));
            if let Ok(EventStatus::Canceled) = dispatch_event(host, &event) {
                return;
            }
            host.report_uncaught_error(url, error);
            return;
        }

        // Nobody outside listens yet. Keep the event for whoever starts
        // listening, and tell the console now. The worker's own `onerror`
        // has already seen it if there was one.
        let inside_listens = host
            .workers
            .get(&worker)
            .is_some_and(|this| this.eventtarget.has_listeners_for(EventType::Error));
        let outside = Event::new_error(EventTargetId::Worker(object), ErrorEvent::from_script_error(error));
        let mut queued = vec![(EventQueueId::Worker(object, WorkerQueue::Error), outside.clone())];
        if !inside_listens {
            queued.push((
                EventQueueId::WorkerGlobalScope(worker, WorkerQueue::Error),
                outside.copy_for(EventTargetId::WorkerGlobalScope(worker)),
            ));
        }
        for (queue, event) in queued {
            if let Err(failure) = deliver_event(host, queue, event) {
                warn!("Could not queue error event for {:?}: {}", queue, failure);
            }
        }
        host.report_uncaught_error(url, error);
    }

    /// Fail the worker's start-up: its outside objects get a simple `error`
    /// event carrying `message`, the console is told, and the worker is
    /// terminated.
    pub(crate) fn fail_initial_load(
        host: &mut ScriptHost,
        worker: WorkerId,
        url: &FerryUrl,
        failure: &Error,
        message: &str,
    ) {
        let objects = match host.workers.get(&worker) {
            Some(this) => this.connected.clone(),
            None => return,
        };
        for object in objects {
            let event = Event::new_error(EventTargetId::Worker(object), ErrorEvent::simple(message, url.as_str()));
            if let Err(error) = deliver_event(host, EventQueueId::Worker(object, WorkerQueue::Error), event) {
                warn!("Could not queue load failure for {}: {}", object, error);
            }
        }
        host.post_console_message(ConsoleMessage {
            source: ConsoleMessageSource::ScriptLoad,
            message: format!("Failed to load worker script {} ({})", url, failure),
            url: url.to_string(),
            line: 0,
        });
        Self::terminate(host, worker);
    }
}
