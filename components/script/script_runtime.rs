/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The script runtime owns every execution context of one script thread, and
//! the collaborators the embedder plugs in.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use base::id::{
    ArrayBufferId, HeapId, MessagePortId, WorkerDomainId, WorkerId, WorkerObjectId,
};
use ferry_config::prefs::{PrefValue, PreferenceStore, Preferences, PreferencesObserver};
use ferry_url::FerryUrl;
use log::{debug, info};
use script_traits::{
    ConsoleMessage, ConsoleMessageSource, ConsoleSink, DefaultStructuredCloneHost, LogConsole,
    SameOriginPolicy, ScriptError, SecurityPolicy, StructuredCloneHost,
};

use crate::dom::abstractworker::WorkerInfo;
use crate::dom::arraybuffer::ArrayBuffer;
use crate::dom::bindings::error::{Error, ErrorResult, Fallible};
use crate::dom::event::{EventTargetId, EventType};
use crate::dom::eventqueue::{EventQueue, EventQueueId, WorkerQueue};
use crate::dom::eventtarget::{EventListener, EventTarget};
use crate::dom::globalscope::{GlobalScope, GlobalScopeKind};
use crate::dom::messageport::MessagePort;
use crate::dom::worker::Worker;
use crate::dom::workercontroller::WorkerController;
use crate::dom::workerdomain::WorkerDomain;
use crate::dom::workerglobalscope::WorkerGlobalScope;
use crate::dom::workermanager::WorkerManager;
use crate::script_loader::WorkerScriptLoader;

/// What the caller of an operation should do with its logical thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Continuation {
    /// Keep running.
    Proceed,
    /// Give other contexts a turn before continuing. Returned after a
    /// message crossed into another heap, so a flooding sender cannot starve
    /// the receiver.
    Yield,
    /// Wait until the pending loads of the worker have completed.
    Block,
}

/// The services a host consumes from its embedder.
#[derive(Clone)]
pub struct Embedder {
    pub loader: Rc<dyn WorkerScriptLoader>,
    pub security: Rc<dyn SecurityPolicy>,
    pub clone_host: Rc<dyn StructuredCloneHost>,
    pub console: Rc<dyn ConsoleSink>,
}

impl Embedder {
    /// An embedder with the default same-origin policy, cloning and
    /// console.
    pub fn new(loader: Rc<dyn WorkerScriptLoader>) -> Embedder {
        Embedder {
            loader,
            security: Rc::new(SameOriginPolicy),
            clone_host: Rc::new(DefaultStructuredCloneHost),
            console: Rc::new(LogConsole),
        }
    }

    pub fn with_security(mut self, security: Rc<dyn SecurityPolicy>) -> Embedder {
        self.security = security;
        self
    }

    pub fn with_clone_host(mut self, clone_host: Rc<dyn StructuredCloneHost>) -> Embedder {
        self.clone_host = clone_host;
        self
    }

    pub fn with_console(mut self, console: Rc<dyn ConsoleSink>) -> Embedder {
        self.console = console;
        self
    }
}

/// The worker quotas, kept current by a preferences observer.
#[derive(Debug)]
pub struct WorkerLimits {
    per_context: AtomicUsize,
    per_session: AtomicUsize,
}

fn limit_from_pref(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

impl WorkerLimits {
    fn from_preferences(preferences: &Preferences) -> WorkerLimits {
        WorkerLimits {
            per_context: AtomicUsize::new(limit_from_pref(preferences.dom_workers_max_per_context)),
            per_session: AtomicUsize::new(limit_from_pref(preferences.dom_workers_max_per_session)),
        }
    }

    pub fn max_per_context(&self) -> usize {
        self.per_context.load(Ordering::Relaxed)
    }

    pub fn max_per_session(&self) -> usize {
        self.per_session.load(Ordering::Relaxed)
    }
}

struct WorkerLimitsObserver(Arc<WorkerLimits>);

impl PreferencesObserver for WorkerLimitsObserver {
    fn prefs_changed(&self, changes: &[(&'static str, PrefValue)]) {
        for (name, value) in changes {
            let PrefValue::Int(value) = value else {
                continue;
            };
            let limit = match *name {
                "dom_workers_max_per_context" => &self.0.per_context,
                "dom_workers_max_per_session" => &self.0.per_session,
                _ => continue,
            };
            info!("Worker limit {} is now {}", name, value);
            limit.store(limit_from_pref(*value), Ordering::Relaxed);
        }
    }
}

/// Every execution context of one script thread, and every object living in
/// them. Objects refer to each other by id; tearing a context down removes
/// its objects and every reference to them.
pub struct ScriptHost {
    pub(crate) embedder: Embedder,
    pub(crate) limits: Arc<WorkerLimits>,
    pub(crate) globals: HashMap<HeapId, GlobalScope>,
    pub(crate) ports: HashMap<MessagePortId, MessagePort>,
    pub(crate) buffers: HashMap<ArrayBufferId, ArrayBuffer>,
    /// Worker insides, each in its own heap.
    pub(crate) workers: HashMap<WorkerId, WorkerGlobalScope>,
    /// Worker outsides, each in the context that made it.
    pub(crate) worker_objects: HashMap<WorkerObjectId, Worker>,
    pub(crate) domains: HashMap<WorkerDomainId, WorkerDomain>,
    pub(crate) manager: WorkerManager,
}

impl ScriptHost {
    /// A host whose worker quotas follow `preferences`.
    pub fn new(embedder: Embedder, preferences: &PreferenceStore) -> ScriptHost {
        let limits = Arc::new(WorkerLimits::from_preferences(&preferences.get()));
        preferences.add_observer(Box::new(WorkerLimitsObserver(limits.clone())));
        ScriptHost {
            embedder,
            limits,
            globals: HashMap::new(),
            ports: HashMap::new(),
            buffers: HashMap::new(),
            workers: HashMap::new(),
            worker_objects: HashMap::new(),
            domains: HashMap::new(),
            manager: WorkerManager::default(),
        }
    }

    /// Create a document context for `url`.
    pub fn new_window(&mut self, url: &str) -> Fallible<HeapId> {
        let url = FerryUrl::parse(url).map_err(|_| Error::Syntax)?;
        let global = GlobalScope::new_inherited(GlobalScopeKind::Window, url);
        let heap = global.heap_id();
        self.globals.insert(heap, global);
        debug!("Created window {}", heap);
        Ok(heap)
    }

    /// Tear down a context: its worker objects are released, the domains it
    /// owns are detached, its own worker is closed, and every port and
    /// buffer in it is destroyed. Calls for a context already being torn
    /// down are no-ops.
    pub fn destroy_global(&mut self, heap: HeapId) {
        match self.globals.get_mut(&heap) {
            Some(global) if !global.is_destroying() => global.set_destroying(),
            _ => return,
        }
        debug!("Destroying {}", heap);

        WorkerController::detach_web_workers(self, heap);

        if let Some(worker) = self.worker_in_heap(heap) {
            WorkerGlobalScope::close_worker(self, worker);
            self.workers.remove(&worker);
        }

        let ports = self
            .globals
            .get(&heap)
            .map(|global| global.message_ports().to_vec())
            .unwrap_or_default();
        for port in ports {
            MessagePort::destroy(self, port);
        }
        self.buffers.retain(|_, buffer| buffer.heap() != heap);
        self.globals.remove(&heap);
    }

    pub fn global(&self, heap: HeapId) -> Option<&GlobalScope> {
        self.globals.get(&heap)
    }

    pub(crate) fn global_mut(&mut self, heap: HeapId) -> Option<&mut GlobalScope> {
        self.globals.get_mut(&heap)
    }

    pub fn port(&self, port: MessagePortId) -> Option<&MessagePort> {
        self.ports.get(&port)
    }

    pub fn buffer(&self, buffer: ArrayBufferId) -> Option<&ArrayBuffer> {
        self.buffers.get(&buffer)
    }

    pub fn worker(&self, worker: WorkerId) -> Option<&WorkerGlobalScope> {
        self.workers.get(&worker)
    }

    pub fn worker_object(&self, object: WorkerObjectId) -> Option<&Worker> {
        self.worker_objects.get(&object)
    }

    pub fn domain(&self, domain: WorkerDomainId) -> Option<&WorkerDomain> {
        self.domains.get(&domain)
    }

    pub fn manager(&self) -> &WorkerManager {
        &self.manager
    }

    pub fn limits(&self) -> &WorkerLimits {
        &self.limits
    }

    /// The worker running in `heap`, if it is a worker's environment.
    pub fn worker_in_heap(&self, heap: HeapId) -> Option<WorkerId> {
        self.globals.get(&heap).and_then(GlobalScope::worker)
    }

    /// Every live worker, ordered by id.
    pub fn worker_info(&self) -> Vec<WorkerInfo> {
        let mut info: Vec<WorkerInfo> = self.workers.values().map(WorkerGlobalScope::info).collect();
        info.sort_by_key(|worker| worker.id);
        info
    }

    pub(crate) fn heap_of(&self, target: EventTargetId) -> Option<HeapId> {
        match target {
            EventTargetId::MessagePort(port) => self.ports.get(&port).map(MessagePort::heap),
            EventTargetId::WorkerGlobalScope(worker) => {
                self.workers.get(&worker).map(WorkerGlobalScope::heap)
            },
            EventTargetId::Worker(object) => self.worker_objects.get(&object).map(Worker::heap),
        }
    }

    pub(crate) fn event_target(&self, target: EventTargetId) -> Option<&EventTarget> {
        match target {
            EventTargetId::MessagePort(port) => self.ports.get(&port).map(MessagePort::eventtarget),
            EventTargetId::WorkerGlobalScope(worker) => {
                self.workers.get(&worker).map(WorkerGlobalScope::eventtarget)
            },
            EventTargetId::Worker(object) => {
                self.worker_objects.get(&object).map(Worker::eventtarget)
            },
        }
    }

    pub(crate) fn event_queue_mut(&mut self, queue: EventQueueId) -> Option<&mut EventQueue> {
        match queue {
            EventQueueId::MessagePort(port) => {
                self.ports.get_mut(&port).map(MessagePort::message_queue_mut)
            },
            EventQueueId::WorkerGlobalScope(worker, queue) => {
                self.workers.get_mut(&worker).map(|worker| worker.queue_mut(queue))
            },
            EventQueueId::Worker(object, queue) => self
                .worker_objects
                .get_mut(&object)
                .and_then(|object| object.queue_mut(queue)),
        }
    }

    /// Record that script in `heap` holds a reference to `port`.
    pub fn root_port(&mut self, heap: HeapId, port: MessagePortId) -> ErrorResult {
        self.globals
            .get_mut(&heap)
            .ok_or(Error::InvalidState)?
            .root_port(port)
    }

    /// Script in `heap` dropped a reference to `port`.
    pub fn unroot_port(&mut self, heap: HeapId, port: MessagePortId) {
        if let Some(global) = self.globals.get_mut(&heap) {
            global.unroot_port(port);
        }
    }

    pub(crate) fn root_ports(&mut self, heap: HeapId, ports: &[MessagePortId]) -> ErrorResult {
        let global = self.globals.get_mut(&heap).ok_or(Error::InvalidState)?;
        for port in ports {
            global.root_port(*port)?;
        }
        Ok(())
    }

    /// Report an exception script in `heap` did not catch. Inside a worker
    /// it takes the worker error path; elsewhere it goes to the console.
    pub fn report_exception(&mut self, heap: HeapId, error: ScriptError) {
        if let Some(worker) = self.worker_in_heap(heap) {
            WorkerGlobalScope::handle_error(self, worker, &error);
            return;
        }
        let url = self
            .global(heap)
            .map(|global| global.creation_url().to_string())
            .unwrap_or_default();
        self.report_uncaught_error(url, &error);
    }

    pub(crate) fn report_uncaught_error(&self, url: String, error: &ScriptError) {
        self.post_console_message(ConsoleMessage {
            source: ConsoleMessageSource::UncaughtError,
            message: error.to_string(),
            url,
            line: error.lineno,
        });
    }

    pub fn post_console_message(&self, message: ConsoleMessage) {
        self.embedder.console.post_message(message);
    }

    /// `addEventListener` on any target. Registering may deliver events that
    /// were waiting for a listener, except on a port that has not been
    /// started.
    pub fn add_event_listener(
        &mut self,
        target: EventTargetId,
        type_: EventType,
        listener: EventListener,
    ) -> ErrorResult {
        match target {
            EventTargetId::MessagePort(port) => {
                self.ports
                    .get_mut(&port)
                    .ok_or(Error::InvalidState)?
                    .eventtarget_mut()
                    .add_event_listener(type_, listener);
                Ok(())
            },
            EventTargetId::WorkerGlobalScope(worker) => {
                WorkerGlobalScope::add_event_listener(self, worker, type_, listener)
            },
            EventTargetId::Worker(object) => Worker::add_event_listener(self, object, type_, listener),
        }
    }

    pub fn remove_event_listener(
        &mut self,
        target: EventTargetId,
        type_: EventType,
        listener: &EventListener,
    ) -> ErrorResult {
        let eventtarget = match target {
            EventTargetId::MessagePort(port) => self
                .ports
                .get_mut(&port)
                .map(MessagePort::eventtarget_mut),
            EventTargetId::WorkerGlobalScope(worker) => self
                .workers
                .get_mut(&worker)
                .map(WorkerGlobalScope::eventtarget_mut),
            EventTargetId::Worker(object) => self
                .worker_objects
                .get_mut(&object)
                .map(Worker::eventtarget_mut),
        };
        eventtarget
            .ok_or(Error::InvalidState)?
            .remove_event_listener(type_, listener);
        Ok(())
    }

    /// Destroy the ports of `heap` that nothing can reach any more. Roots
    /// are the ports script holds, ports kept alive for another heap, ports
    /// of the heap's worker and worker objects, and ports riding on queued
    /// events. Aliases and same-heap peers of reachable ports are reachable.
    /// Returns the number of ports destroyed.
    pub fn collect_garbage(&mut self, heap: HeapId) -> usize {
        let Some(global) = self.globals.get(&heap) else {
            return 0;
        };

        let mut live: HashSet<MessagePortId> = global.rooted_ports().collect();
        live.extend(global.keep_alive_table().kept_alive());
        if let Some(worker) = global.worker().and_then(|worker| self.workers.get(&worker)) {
            live.extend(worker.entangled_ports().iter().copied());
            for queue in [WorkerQueue::Message, WorkerQueue::Error, WorkerQueue::Connect] {
                for event in worker.queue(queue).pending_events() {
                    live.extend(event.ports().iter().copied());
                }
            }
        }
        for object in self.worker_objects.values().filter(|object| object.heap() == heap) {
            live.extend(object.port());
            for queue in [WorkerQueue::Message, WorkerQueue::Error] {
                for event in object.queue(queue).into_iter().flat_map(|queue| queue.pending_events()) {
                    live.extend(event.ports().iter().copied());
                }
            }
        }

        let mut pending: Vec<MessagePortId> = live.iter().copied().collect();
        while let Some(port) = pending.pop() {
            let Some(port) = self.ports.get(&port) else {
                continue;
            };
            let reachable = [port.forwarding_port(), port.entangled_port()]
                .into_iter()
                .flatten()
                .chain(
                    port.message_queue()
                        .pending_events()
                        .flat_map(|event| event.ports().iter().copied()),
                )
                .filter(|next| self.ports.get(next).is_some_and(|next| next.heap() == heap))
                .collect::<Vec<_>>();
            for next in reachable {
                if live.insert(next) {
                    pending.push(next);
                }
            }
        }

        let dead: Vec<MessagePortId> = global
            .message_ports()
            .iter()
            .filter(|port| !live.contains(port))
            .copied()
            .collect();
        for port in &dead {
            MessagePort::destroy(self, *port);
        }
        if !dead.is_empty() {
            debug!("Collected {} ports in {}", dead.len(), heap);
        }
        dead.len()
    }
}
