/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Fetching and running worker scripts.
//!
//! The embedder's [`WorkerScriptLoader`] answers every request exactly once
//! through a oneshot channel. Completions are picked up by
//! [`ScriptHost::process_pending_loads`]; dropping an [`ActiveLoader`] drops
//! its receiver, which is how closing a worker cancels its loads.

use std::collections::VecDeque;
use std::fmt;

use base::id::{HeapId, WorkerId};
use ferry_url::FerryUrl;
use futures::channel::oneshot;
use log::{debug, warn};
use script_traits::ScriptError;

use crate::dom::bindings::error::{Error, ErrorResult};
use crate::dom::errorevent::ErrorEvent;
use crate::dom::event::{Event, EventTargetId};
use crate::dom::eventqueue::{EventQueueId, WorkerQueue, deliver_event};
use crate::dom::workerglobalscope::WorkerGlobalScope;
use crate::script_runtime::ScriptHost;

/// Why a script could not be loaded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadFailure {
    NotFound,
    Network,
    Security,
    Syntax,
    Internal,
    OutOfMemory,
}

impl fmt::Display for LoadFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            LoadFailure::NotFound => "not found",
            LoadFailure::Network => "network error",
            LoadFailure::Security => "security error",
            LoadFailure::Syntax => "syntax error",
            LoadFailure::Internal => "internal error",
            LoadFailure::OutOfMemory => "out of memory",
        })
    }
}

/// A compiled script, ready to run in the worker it was fetched for.
pub type WorkerScript = Box<dyn FnOnce(&mut ScriptHost, WorkerId) -> Result<(), ScriptError>>;

pub enum LoadOutcome {
    Fetched(WorkerScript),
    /// The fetch was redirected; the host decides whether to follow.
    Redirected(FerryUrl),
    Failed(LoadFailure),
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadOutcome::Fetched(_) => f.write_str("Fetched(..)"),
            LoadOutcome::Redirected(url) => write!(f, "Redirected({})", url),
            LoadOutcome::Failed(failure) => write!(f, "Failed({:?})", failure),
        }
    }
}

/// Fetches worker scripts on behalf of the host.
pub trait WorkerScriptLoader {
    /// Start fetching `url` for the context `heap`. The receiver yields
    /// exactly one outcome unless the host drops it first.
    fn fetch(&self, url: &FerryUrl, heap: HeapId) -> oneshot::Receiver<LoadOutcome>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LoadPurpose {
    /// The worker's own script.
    Initial,
    /// A script named by `importScripts()`.
    Import,
}

/// A load in flight for one worker.
pub struct ActiveLoader {
    purpose: LoadPurpose,
    url: FerryUrl,
    /// Further imports to fetch, in order, once this one has run.
    pending_urls: VecDeque<FerryUrl>,
    heap: HeapId,
    receiver: oneshot::Receiver<LoadOutcome>,
    /// An outcome that arrived before the loader was stored.
    ready: Option<LoadOutcome>,
}

impl ActiveLoader {
    pub(crate) fn start(
        host: &ScriptHost,
        purpose: LoadPurpose,
        url: FerryUrl,
        pending_urls: VecDeque<FerryUrl>,
        heap: HeapId,
    ) -> ActiveLoader {
        debug!("Fetching {} for {}", url, heap);
        let receiver = host.embedder.loader.fetch(&url, heap);
        ActiveLoader {
            purpose,
            url,
            pending_urls,
            heap,
            receiver,
            ready: None,
        }
    }

    pub fn purpose(&self) -> LoadPurpose {
        self.purpose
    }

    pub fn url(&self) -> &FerryUrl {
        &self.url
    }

    fn poll(&mut self) -> Option<LoadOutcome> {
        if let Some(outcome) = self.ready.take() {
            return Some(outcome);
        }
        match self.receiver.try_recv() {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => Some(LoadOutcome::Failed(LoadFailure::Network)),
        }
    }

    /// Fail now if the loader has already given up on this request. Any
    /// other early outcome is kept for later processing.
    pub(crate) fn check_immediate_failure(&mut self) -> ErrorResult {
        match self.poll() {
            Some(LoadOutcome::Failed(failure)) => {
                warn!("Loading {} failed: {}", self.url, failure);
                Err(Error::from(failure))
            },
            outcome => {
                self.ready = outcome;
                Ok(())
            },
        }
    }
}

impl ScriptHost {
    /// Run every load completion that has arrived, including the ones that
    /// arrive while doing so. Returns how many completions were handled.
    pub fn process_pending_loads(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let mut workers: Vec<WorkerId> = self
                .workers
                .iter()
                .filter(|(_, worker)| !worker.active_loaders.is_empty())
                .map(|(id, _)| *id)
                .collect();
            workers.sort();

            let mut progressed = false;
            for worker in workers {
                let Some((loader, outcome)) = self.take_ready_load(worker) else {
                    continue;
                };
                progressed = true;
                handled += 1;
                complete_load(self, worker, loader, outcome);
            }
            if !progressed {
                return handled;
            }
        }
    }

    fn take_ready_load(&mut self, worker: WorkerId) -> Option<(ActiveLoader, LoadOutcome)> {
        let loaders = &mut self.workers.get_mut(&worker)?.active_loaders;
        let (index, outcome) = loaders
            .iter_mut()
            .enumerate()
            .find_map(|(index, loader)| loader.poll().map(|outcome| (index, outcome)))?;
        Some((loaders.remove(index), outcome))
    }
}

fn complete_load(host: &mut ScriptHost, worker: WorkerId, loader: ActiveLoader, outcome: LoadOutcome) {
    match outcome {
        LoadOutcome::Redirected(target) => follow_redirect(host, worker, loader, target),
        LoadOutcome::Failed(failure) => fail_load(host, worker, loader, failure),
        LoadOutcome::Fetched(script) => {
            let result = script(host, worker);
            match loader.purpose {
                LoadPurpose::Initial => {
                    if let Err(exception) = result {
                        WorkerGlobalScope::handle_error(host, worker, &exception);
                    }
                    if let Err(error) = WorkerGlobalScope::enable(host, worker) {
                        warn!("Enabling {} failed: {}", worker, error);
                    }
                },
                LoadPurpose::Import => match result {
                    Ok(()) => continue_imports(host, worker, loader),
                    Err(exception) => {
                        debug!("Import of {} threw, abandoning the rest", loader.url);
                        WorkerGlobalScope::handle_error(host, worker, &exception);
                    },
                },
            }
        },
    }
}

fn continue_imports(host: &mut ScriptHost, worker: WorkerId, loader: ActiveLoader) {
    let ActiveLoader {
        mut pending_urls,
        heap,
        ..
    } = loader;
    let Some(next) = pending_urls.pop_front() else {
        return;
    };
    let next = ActiveLoader::start(host, LoadPurpose::Import, next, pending_urls, heap);
    push_loader(host, worker, next);
}

fn follow_redirect(host: &mut ScriptHost, worker: WorkerId, loader: ActiveLoader, target: FerryUrl) {
    if host.embedder.security.allows_redirect(&loader.url, &target) {
        debug!("Following redirect from {} to {}", loader.url, target);
        let ActiveLoader {
            purpose,
            pending_urls,
            heap,
            ..
        } = loader;
        let next = ActiveLoader::start(host, purpose, target, pending_urls, heap);
        push_loader(host, worker, next);
        return;
    }

    warn!("Blocked redirect from {} to {}", loader.url, target);
    let event = Event::new_error(
        EventTargetId::WorkerGlobalScope(worker),
        ErrorEvent::simple(
            format!("Security error: redirect to {} is not allowed", target),
            loader.url.as_str(),
        ),
    );
    if let Err(error) = deliver_event(
        host,
        EventQueueId::WorkerGlobalScope(worker, WorkerQueue::Error),
        event,
    ) {
        warn!("Could not report blocked redirect to {}: {}", worker, error);
    }
    fail_load(host, worker, loader, LoadFailure::Security);
}

fn fail_load(host: &mut ScriptHost, worker: WorkerId, loader: ActiveLoader, failure: LoadFailure) {
    warn!("Loading {} for {} failed: {}", loader.url, worker, failure);
    let error = Error::from(failure);
    match loader.purpose {
        LoadPurpose::Initial => {
            let message = match failure {
                LoadFailure::Internal => "Internal error",
                LoadFailure::OutOfMemory => "Out of memory",
                _ => "",
            };
            WorkerGlobalScope::fail_initial_load(host, worker, &loader.url, &error, message)
        },
        LoadPurpose::Import => {
            let exception = ScriptError::new(format!("{}: Failed to import {}", error.name(), loader.url))
                .at(loader.url.as_str(), 0, 0);
            WorkerGlobalScope::handle_error(host, worker, &exception);
        },
    }
}

fn push_loader(host: &mut ScriptHost, worker: WorkerId, loader: ActiveLoader) {
    match host.workers.get_mut(&worker) {
        Some(this) if !this.is_closed() => {
            if this.active_loaders.try_reserve(1).is_err() {
                warn!("Out of memory queueing a load for {}", worker);
                return;
            }
            this.active_loaders.push(loader);
        },
        _ => debug!("Dropping load of {} for closed {}", loader.url, worker),
    }
}
