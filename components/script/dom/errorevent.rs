/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use script_traits::{ExceptionSignature, ScriptError};

/// <https://html.spec.whatwg.org/multipage/#errorevent>
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorEvent {
    message: String,
    filename: String,
    lineno: u32,
    colno: u32,
    error: Option<ScriptError>,
}

impl ErrorEvent {
    /// An error event describing an uncaught exception.
    pub fn from_script_error(error: &ScriptError) -> ErrorEvent {
        ErrorEvent {
            message: error.message.clone(),
            filename: error.filename.clone(),
            lineno: error.lineno,
            colno: error.colno,
            error: Some(error.clone()),
        }
    }

    /// A simple error event with no exception attached, as fired at a
    /// `Worker` whose script could not be fetched.
    pub fn simple(message: impl Into<String>, filename: impl Into<String>) -> ErrorEvent {
        ErrorEvent {
            message: message.into(),
            filename: filename.into(),
            lineno: 0,
            colno: 0,
            error: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn lineno(&self) -> u32 {
        self.lineno
    }

    pub fn colno(&self) -> u32 {
        self.colno
    }

    pub fn error(&self) -> Option<&ScriptError> {
        self.error.as_ref()
    }

    pub fn signature(&self) -> ExceptionSignature {
        ExceptionSignature {
            message: self.message.clone(),
            lineno: self.lineno,
            filename: self.filename.clone(),
        }
    }
}
