/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The code that connects script-visible operations to the object arena:
//! exceptions, cross-heap keep-alive handles, and structured clone with
//! transfer.

pub mod crossheap;
pub mod error;
pub mod structuredclone;
pub mod transferable;
