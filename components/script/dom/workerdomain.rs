/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The execution environment one or more workers of the same script run in.
//!
//! A domain is owned by the contexts that use it. It goes away when its last
//! owner detaches or its last worker closes, whichever happens first, and
//! takes its environment with it.

use base::id::{HeapId, WorkerDomainId, WorkerId};
use ferry_url::{FerryUrl, ImmutableOrigin};
use log::debug;

use crate::dom::abstractworker::WorkerKind;
use crate::dom::bindings::error::{Error, ErrorResult, Fallible};
use crate::dom::globalscope::GlobalScope;
use crate::dom::workercontroller::WorkerController;
use crate::dom::workerglobalscope::WorkerGlobalScope;
use crate::script_runtime::ScriptHost;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DomainState {
    Constructing,
    Active,
    /// Shutting down. Entered once; no owner or worker may join.
    Closing,
}

pub struct WorkerDomain {
    id: WorkerDomainId,
    environment: HeapId,
    url: FerryUrl,
    origin: ImmutableOrigin,
    kind: WorkerKind,
    owners: Vec<HeapId>,
    workers: Vec<WorkerId>,
    state: DomainState,
}

impl WorkerDomain {
    /// Create a domain for `url` on behalf of `owner`: a fresh environment,
    /// the worker running in it, and the bookkeeping that charges `owner`
    /// for it. Script loading is left to the caller.
    pub fn make(
        host: &mut ScriptHost,
        owner: HeapId,
        url: FerryUrl,
        kind: WorkerKind,
    ) -> Fallible<(WorkerDomainId, WorkerId)> {
        if !host.globals.contains_key(&owner) {
            return Err(Error::InvalidState);
        }

        let id = WorkerDomainId::new();
        let worker = WorkerId::new();
        let mut environment = GlobalScope::new_inherited(kind.global_scope_kind(), url.clone());
        let heap = environment.heap_id();
        environment.set_worker(worker);
        environment.set_domain(id);
        host.globals.insert(heap, environment);
        host.workers.insert(
            worker,
            WorkerGlobalScope::new_inherited(worker, heap, id, kind.clone(), url.clone()),
        );
        host.domains.insert(
            id,
            WorkerDomain {
                id,
                environment: heap,
                origin: url.origin(),
                url,
                kind,
                owners: vec![owner],
                workers: vec![worker],
                state: DomainState::Constructing,
            },
        );

        let registered = host
            .manager
            .add_domain(id)
            .and_then(|_| WorkerController::add_domain(host, owner, id, true));
        if let Err(error) = registered {
            Self::shutdown(host, id);
            return Err(error);
        }
        if let Some(domain) = host.domains.get_mut(&id) {
            domain.state = DomainState::Active;
        }
        debug!("Created {} in {} for {}", worker, heap, owner);
        Ok((id, worker))
    }

    pub fn id(&self) -> WorkerDomainId {
        self.id
    }

    pub fn environment(&self) -> HeapId {
        self.environment
    }

    pub fn url(&self) -> &FerryUrl {
        &self.url
    }

    pub fn origin(&self) -> &ImmutableOrigin {
        &self.origin
    }

    pub fn kind(&self) -> &WorkerKind {
        &self.kind
    }

    pub fn is_dedicated(&self) -> bool {
        !self.kind.is_shared()
    }

    pub fn owners(&self) -> &[HeapId] {
        &self.owners
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    pub fn state(&self) -> DomainState {
        self.state
    }

    pub fn is_closing(&self) -> bool {
        self.state == DomainState::Closing
    }

    pub fn add_domain_owner(host: &mut ScriptHost, domain: WorkerDomainId, owner: HeapId) -> ErrorResult {
        let this = host.domains.get_mut(&domain).ok_or(Error::InvalidState)?;
        if this.is_closing() {
            return Err(Error::InvalidState);
        }
        if !this.owners.contains(&owner) {
            this.owners.try_reserve(1)?;
            this.owners.push(owner);
        }
        Ok(())
    }

    /// Returns whether `owner` was an owner.
    pub fn remove_domain_owner(host: &mut ScriptHost, domain: WorkerDomainId, owner: HeapId) -> bool {
        let Some(this) = host.domains.get_mut(&domain) else {
            return false;
        };
        let before = this.owners.len();
        this.owners.retain(|known| *known != owner);
        this.owners.len() != before
    }

    pub fn add_web_worker(host: &mut ScriptHost, domain: WorkerDomainId, worker: WorkerId) -> ErrorResult {
        let this = host.domains.get_mut(&domain).ok_or(Error::InvalidState)?;
        if this.is_closing() {
            return Err(Error::InvalidState);
        }
        if !this.workers.contains(&worker) {
            if this.is_dedicated() && !this.workers.is_empty() {
                return Err(Error::InvalidState);
            }
            this.workers.try_reserve(1)?;
            this.workers.push(worker);
        }
        Ok(())
    }

    /// Drop a closed worker. The last worker to leave shuts the domain down.
    pub fn remove_web_worker(host: &mut ScriptHost, domain: WorkerDomainId, worker: WorkerId) {
        let Some(this) = host.domains.get_mut(&domain) else {
            return;
        };
        this.workers.retain(|known| *known != worker);
        if this.workers.is_empty() && !this.is_closing() {
            Self::shutdown(host, domain);
        }
    }

    /// <https://html.spec.whatwg.org/multipage/#the-worker's-lifetime>
    ///
    /// `owner` stops using the domain. The last owner to leave shuts it down.
    pub fn detach(host: &mut ScriptHost, domain: WorkerDomainId, owner: HeapId) {
        Self::remove_domain_owner(host, domain, owner);
        let orphaned = host
            .domains
            .get(&domain)
            .is_some_and(|this| this.owners.is_empty() && !this.is_closing());
        if orphaned {
            Self::shutdown(host, domain);
        }
    }

    /// Terminate every worker, give the quota back to every owner, then
    /// destroy the environment and the domain. Re-entrant calls are no-ops.
    pub fn shutdown(host: &mut ScriptHost, domain: WorkerDomainId) {
        let (workers, owners, environment) = match host.domains.get_mut(&domain) {
            Some(this) if !this.is_closing() => {
                this.state = DomainState::Closing;
                (
                    this.workers.clone(),
                    std::mem::take(&mut this.owners),
                    this.environment,
                )
            },
            _ => return,
        };
        debug!("Shutting down {} ({} workers)", domain, workers.len());

        for worker in workers {
            WorkerGlobalScope::terminate(host, worker);
        }
        for owner in owners {
            WorkerController::remove_domain(host, owner, domain);
        }
        host.manager.remove_domain(domain);
        host.destroy_global(environment);
        host.domains.remove(&domain);
    }
}
