/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use ferry_url::{FerryUrl, ImmutableOrigin};

/// Answers whether an operation crossing a context boundary is allowed.
pub trait SecurityPolicy {
    /// Whether a port owned by `accessor` may be entangled with a port owned
    /// by `target`. Only consulted when the origins differ.
    fn allows_entanglement(&self, accessor: &ImmutableOrigin, target: &ImmutableOrigin) -> bool;

    /// Whether a context of origin `requester` may run `url` as a worker
    /// script, either as the initial script or through `importScripts`.
    fn allows_worker_script(&self, requester: &ImmutableOrigin, url: &FerryUrl) -> bool;

    /// Whether a worker script load from `from` may follow a redirect to `to`.
    fn allows_redirect(&self, from: &FerryUrl, to: &FerryUrl) -> bool;
}

/// The default policy: ports may connect any two origins, worker scripts
/// must be same-origin (or `data:`) and redirects must not leave the origin.
#[derive(Default)]
pub struct SameOriginPolicy;

impl SecurityPolicy for SameOriginPolicy {
    fn allows_entanglement(&self, _accessor: &ImmutableOrigin, _target: &ImmutableOrigin) -> bool {
        true
    }

    fn allows_worker_script(&self, requester: &ImmutableOrigin, url: &FerryUrl) -> bool {
        if !url.is_fetch_scheme() {
            return false;
        }
        url.scheme() == "data" || requester.same_origin(&url.origin())
    }

    fn allows_redirect(&self, from: &FerryUrl, to: &FerryUrl) -> bool {
        from.origin().same_origin(&to.origin())
    }
}
