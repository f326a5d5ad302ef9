/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Utilities to throw exceptions from Rust bindings.

use std::collections::TryReserveError;
use std::fmt;

use crate::script_loader::LoadFailure;

/// The description and location carried by a `DataCloneError`.
#[derive(Clone, Debug, PartialEq)]
pub struct CloneErrorInfo {
    pub description: String,
    /// The operation that attempted the clone, e.g. `MessagePort.postMessage`.
    pub location: String,
}

/// DOM exceptions that can be thrown by a native DOM method.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// NotFoundError DOMException
    NotFound,
    /// NotSupportedError DOMException
    NotSupported,
    /// InvalidStateError DOMException
    InvalidState,
    /// SyntaxError DOMException
    Syntax,
    /// InvalidAccessError DOMException
    InvalidAccess,
    /// SecurityError DOMException
    Security(Option<String>),
    /// NetworkError DOMException
    Network,
    /// QuotaExceededError DOMException
    QuotaExceeded,
    /// DataCloneError DOMException
    DataClone(Option<CloneErrorInfo>),
    /// TypeError JavaScript Error
    Type(String),
    /// Allocation failed. Never folded into any other kind of failure.
    NoMemory,
}

impl Error {
    /// The `DOMException` name, or the JavaScript error constructor name.
    pub fn name(&self) -> &'static str {
        match self {
            Error::NotFound => "NotFoundError",
            Error::NotSupported => "NotSupportedError",
            Error::InvalidState => "InvalidStateError",
            Error::Syntax => "SyntaxError",
            Error::InvalidAccess => "InvalidAccessError",
            Error::Security(_) => "SecurityError",
            Error::Network => "NetworkError",
            Error::QuotaExceeded => "QuotaExceededError",
            Error::DataClone(_) => "DataCloneError",
            Error::Type(_) => "TypeError",
            Error::NoMemory => "InternalError",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Security(Some(message)) | Error::Type(message) => {
                write!(f, "{}: {}", self.name(), message)
            },
            Error::DataClone(Some(info)) => {
                write!(f, "{}: {} ({})", self.name(), info.description, info.location)
            },
            Error::NoMemory => f.write_str("out of memory"),
            _ => f.write_str(self.name()),
        }
    }
}

impl std::error::Error for Error {}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Error {
        Error::NoMemory
    }
}

impl From<LoadFailure> for Error {
    fn from(failure: LoadFailure) -> Error {
        match failure {
            LoadFailure::NotFound => Error::NotFound,
            LoadFailure::Network | LoadFailure::Internal => Error::Network,
            LoadFailure::Security => Error::Security(None),
            LoadFailure::Syntax => Error::Syntax,
            LoadFailure::OutOfMemory => Error::NoMemory,
        }
    }
}

/// The return type for IDL operations that can throw DOM exceptions.
pub type Fallible<T> = Result<T, Error>;

/// The return type for IDL operations that can throw DOM exceptions and
/// return `()`.
pub type ErrorResult = Fallible<()>;
