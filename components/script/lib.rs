/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The worker and message-port core of the ferry script host.
//!
//! Every execution context is a [`dom::globalscope::GlobalScope`] owned by a
//! [`ScriptHost`]. Objects refer to each other by id, never by pointer, so
//! a context can be torn down without leaving dangling references behind.

#![deny(unsafe_code)]

pub mod dom;
pub mod script_loader;
pub mod script_runtime;

pub use crate::script_runtime::{Continuation, Embedder, ScriptHost};
