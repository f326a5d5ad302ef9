/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::{HeapId, WorkerDomainId, WorkerObjectId};
use log::debug;

use crate::dom::bindings::error::{Error, ErrorResult};
use crate::dom::worker::Worker;
use crate::dom::workerdomain::WorkerDomain;
use crate::script_runtime::ScriptHost;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct DomainEntry {
    domain: WorkerDomainId,
    /// Whether this context created the domain, and so is charged for it
    /// against both quotas.
    counted: bool,
}

/// The workers one execution context has started or connected to.
#[derive(Debug, Default)]
pub struct WorkerController {
    domains: Vec<DomainEntry>,
    worker_objects: Vec<WorkerObjectId>,
}

impl WorkerController {
    /// Whether this context may start another worker context.
    pub fn allow_new_worker_context(&self, limit: usize) -> bool {
        self.active_worker_count() < limit
    }

    pub fn active_worker_count(&self) -> usize {
        self.domains.iter().filter(|entry| entry.counted).count()
    }

    pub fn domains(&self) -> impl Iterator<Item = WorkerDomainId> + '_ {
        self.domains.iter().map(|entry| entry.domain)
    }

    pub fn worker_objects(&self) -> &[WorkerObjectId] {
        &self.worker_objects
    }

    pub(crate) fn add_worker_object(&mut self, object: WorkerObjectId) -> ErrorResult {
        if !self.worker_objects.contains(&object) {
            self.worker_objects.try_reserve(1)?;
            self.worker_objects.push(object);
        }
        Ok(())
    }

    pub(crate) fn remove_worker_object(&mut self, object: WorkerObjectId) {
        self.worker_objects.retain(|known| *known != object);
    }

    /// Record that the context `owner` uses `domain`. Adding a domain twice
    /// is a no-op.
    pub(crate) fn add_domain(
        host: &mut ScriptHost,
        owner: HeapId,
        domain: WorkerDomainId,
        counted: bool,
    ) -> ErrorResult {
        let controller = host
            .globals
            .get_mut(&owner)
            .ok_or(Error::InvalidState)?
            .worker_controller_mut();
        if controller.domains.iter().any(|entry| entry.domain == domain) {
            return Ok(());
        }
        controller.domains.try_reserve(1)?;
        controller.domains.push(DomainEntry { domain, counted });
        if counted {
            host.manager.worker_started();
        }
        Ok(())
    }

    /// Forget `domain`, giving back its quota if it was counted here.
    pub(crate) fn remove_domain(host: &mut ScriptHost, owner: HeapId, domain: WorkerDomainId) {
        let Some(global) = host.globals.get_mut(&owner) else {
            return;
        };
        let controller = global.worker_controller_mut();
        let Some(index) = controller.domains.iter().position(|entry| entry.domain == domain) else {
            return;
        };
        if controller.domains.remove(index).counted {
            host.manager.worker_stopped();
        }
    }

    /// Release every worker object of the context `owner`, then detach it
    /// from every domain. Objects go first: releasing one reaches its worker,
    /// which a domain shutdown would already have destroyed.
    pub(crate) fn detach_web_workers(host: &mut ScriptHost, owner: HeapId) {
        let (objects, domains) = match host.globals.get_mut(&owner) {
            Some(global) => {
                let controller = global.worker_controller_mut();
                (
                    std::mem::take(&mut controller.worker_objects),
                    std::mem::take(&mut controller.domains),
                )
            },
            None => return,
        };
        debug!(
            "Detaching {} worker objects and {} domains from {}",
            objects.len(),
            domains.len(),
            owner
        );

        for object in objects {
            Worker::release(host, object);
        }
        for entry in domains {
            if entry.counted {
                host.manager.worker_stopped();
            }
            WorkerDomain::detach(host, entry.domain, owner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_counted_domains_use_quota() {
        let mut controller = WorkerController::default();
        controller.domains.push(DomainEntry {
            domain: WorkerDomainId::new(),
            counted: true,
        });
        controller.domains.push(DomainEntry {
            domain: WorkerDomainId::new(),
            counted: false,
        });
        assert_eq!(controller.active_worker_count(), 1);
        assert!(controller.allow_new_worker_context(2));
        assert!(!controller.allow_new_worker_context(1));
    }
}
