/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The DOM objects of the messaging core.
//!
//! ## Ownership
//!
//! Nothing here holds a pointer to anything else. Every object lives in a
//! map on [`ScriptHost`](crate::ScriptHost) keyed by its id, and the
//! operations are associated functions taking the host and the ids they work
//! on. A link between two objects is a pair of ids; whoever removes an object
//! clears the ids pointing at it.
//!
//! ## Heaps
//!
//! Each [`globalscope::GlobalScope`] stands for one garbage-collected heap.
//! A port whose peer lives in another heap holds a
//! [`bindings::crossheap::CrossHeapHandle`] on its own global, which is what
//! keeps it alive while nothing in its heap refers to it.
//!
//! ## Workers
//!
//! A worker has an inside, [`workerglobalscope::WorkerGlobalScope`], running
//! in the heap of its [`workerdomain::WorkerDomain`], and one outside
//! [`worker::Worker`] per connecting context.

pub mod abstractworker;
pub mod arraybuffer;
pub mod bindings;
pub mod errorevent;
pub mod event;
pub mod eventdispatcher;
pub mod eventqueue;
pub mod eventtarget;
pub mod globalscope;
pub mod messagechannel;
pub mod messageevent;
pub mod messageport;
pub mod worker;
pub mod workercontroller;
pub mod workerdomain;
pub mod workerglobalscope;
pub mod workermanager;
