/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Session-wide worker bookkeeping: every live domain, and the count that the
//! per-session quota is checked against.

use base::id::WorkerDomainId;
use ferry_url::FerryUrl;
use log::debug;

use crate::dom::abstractworker::WorkerKind;
use crate::dom::bindings::error::ErrorResult;
use crate::script_runtime::ScriptHost;

#[derive(Debug, Default)]
pub struct WorkerManager {
    domains: Vec<WorkerDomainId>,
    /// Counted worker contexts across all owners.
    active_workers: usize,
}

impl WorkerManager {
    pub fn domains(&self) -> &[WorkerDomainId] {
        &self.domains
    }

    pub fn active_workers(&self) -> usize {
        self.active_workers
    }

    pub fn can_create_worker(&self, limit: usize) -> bool {
        self.active_workers < limit
    }

    pub(crate) fn add_domain(&mut self, domain: WorkerDomainId) -> ErrorResult {
        if !self.domains.contains(&domain) {
            self.domains.try_reserve(1)?;
            self.domains.push(domain);
        }
        Ok(())
    }

    pub(crate) fn remove_domain(&mut self, domain: WorkerDomainId) {
        self.domains.retain(|known| *known != domain);
    }

    pub(crate) fn worker_started(&mut self) {
        self.active_workers += 1;
        debug!("{} active worker contexts", self.active_workers);
    }

    pub(crate) fn worker_stopped(&mut self) {
        self.active_workers = self.active_workers.saturating_sub(1);
        debug!("{} active worker contexts", self.active_workers);
    }

    /// The live shared domain for `url` with the given name. Domains that are
    /// shutting down are never handed out again.
    pub fn find_worker_domain(host: &ScriptHost, url: &FerryUrl, name: &str) -> Option<WorkerDomainId> {
        host.manager.domains.iter().copied().find(|id| {
            host.domains.get(id).is_some_and(|domain| {
                !domain.is_closing() &&
                    domain.url() == url &&
                    matches!(domain.kind(), WorkerKind::Shared(shared) if shared == name)
            })
        })
    }
}
