/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! This module contains traits and data shared between the script core and
//! the services it leans on: the value-level structured clone, origin checks
//! and the console. Having them in a separate crate lets embedders supply
//! their own implementations without depending on the core.

#![deny(unsafe_code)]
#![deny(missing_docs)]

mod console;
mod security;
mod structuredclone;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use crate::console::{ConsoleMessage, ConsoleMessageSource, ConsoleSink, LogConsole};
pub use crate::security::{SameOriginPolicy, SecurityPolicy};
pub use crate::structuredclone::{
    CloneFault, CloneTarget, DefaultStructuredCloneHost, Property, ScriptValue,
    StructuredCloneHost, Transferable,
};

/// An exception thrown by script and not caught by it.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ScriptError {
    /// The exception message, as `String(exception)` would produce it.
    pub message: String,
    /// The URL of the script that threw.
    pub filename: String,
    /// One-based line number, zero when unknown.
    pub lineno: u32,
    /// One-based column number, zero when unknown.
    pub colno: u32,
}

impl ScriptError {
    /// An exception with a message and no location.
    pub fn new(message: impl Into<String>) -> ScriptError {
        ScriptError {
            message: message.into(),
            filename: String::new(),
            lineno: 0,
            colno: 0,
        }
    }

    /// Attach a location.
    pub fn at(mut self, filename: impl Into<String>, lineno: u32, colno: u32) -> ScriptError {
        self.filename = filename.into();
        self.lineno = lineno;
        self.colno = colno;
        self
    }

    /// The identity used to recognise the same exception while it travels
    /// up a worker hierarchy.
    pub fn signature(&self) -> ExceptionSignature {
        ExceptionSignature {
            message: self.message.clone(),
            lineno: self.lineno,
            filename: self.filename.clone(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.filename.is_empty() {
            write!(f, "Uncaught {}", self.message)
        } else {
            write!(
                f,
                "Uncaught {} ({}:{}:{})",
                self.message, self.filename, self.lineno, self.colno
            )
        }
    }
}

/// (message, line, url) of an in-flight exception.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ExceptionSignature {
    /// The exception message.
    pub message: String,
    /// The line the exception was thrown at.
    pub lineno: u32,
    /// The script URL the exception was thrown in.
    pub filename: String,
}
