/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use base::id::WorkerId;
use ferry_url::FerryUrl;

use crate::dom::globalscope::GlobalScopeKind;

/// Which constructor made a worker. Shared workers are found again by URL
/// and name; dedicated workers never are.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum WorkerKind {
    Dedicated,
    /// A shared worker and its name. The empty name is the unnamed worker
    /// for a URL.
    Shared(String),
}

impl WorkerKind {
    pub fn is_shared(&self) -> bool {
        matches!(self, WorkerKind::Shared(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            WorkerKind::Dedicated => None,
            WorkerKind::Shared(name) => Some(name),
        }
    }

    pub(crate) fn global_scope_kind(&self) -> GlobalScopeKind {
        match self {
            WorkerKind::Dedicated => GlobalScopeKind::DedicatedWorker,
            WorkerKind::Shared(_) => GlobalScopeKind::SharedWorker,
        }
    }
}

/// A snapshot of one running worker, for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub url: FerryUrl,
    pub kind: WorkerKind,
    pub enabled: bool,
    pub closed: bool,
    pub parent: Option<WorkerId>,
    pub children: usize,
    /// Outside objects currently connected.
    pub connections: usize,
    pub entangled_ports: usize,
    pub pending_loads: usize,
}
