/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// What produced a console message.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum ConsoleMessageSource {
    /// A worker constructor was refused by the worker quota.
    WorkerQuota,
    /// An uncaught exception nobody handled.
    UncaughtError,
    /// A worker script failed to load.
    ScriptLoad,
}

/// A diagnostic posted to the console.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ConsoleMessage {
    /// What produced the message.
    pub source: ConsoleMessageSource,
    /// The human-readable text.
    pub message: String,
    /// The URL of the context the message is attributed to.
    pub url: String,
    /// The line the message is attributed to, zero if none.
    pub line: u32,
}

/// Accepts diagnostics for display to the user or for telemetry.
pub trait ConsoleSink {
    /// Post one message. Must not call back into the script host.
    fn post_message(&self, message: ConsoleMessage);
}

/// A console that forwards everything to the `log` facade.
#[derive(Default)]
pub struct LogConsole;

impl ConsoleSink for LogConsole {
    fn post_message(&self, message: ConsoleMessage) {
        match message.source {
            ConsoleMessageSource::WorkerQuota => warn!("{} [{}]", message.message, message.url),
            ConsoleMessageSource::UncaughtError | ConsoleMessageSource::ScriptLoad => info!(
                "{} [{}:{}]",
                message.message, message.url, message.line
            ),
        }
    }
}
