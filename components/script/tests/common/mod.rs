/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use base::id::{HeapId, WorkerId, WorkerObjectId};
use ferry_config::prefs::{PreferenceStore, Preferences};
use ferry_url::{FerryUrl, ImmutableOrigin};
use futures::channel::oneshot;
use script::dom::bindings::error::Error;
use script::dom::event::Event;
use script::dom::eventtarget::EventListener;
use script::dom::worker::Worker;
use script::script_loader::{LoadFailure, LoadOutcome, WorkerScriptLoader};
use script::{Embedder, ScriptHost};
use script_traits::{
    ConsoleMessage, ConsoleMessageSource, ConsoleSink, ScriptError, ScriptValue, SecurityPolicy,
};

pub const PAGE_URL: &str = "https://example.com/index.html";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type ScriptFactory = Rc<dyn Fn() -> LoadOutcome>;

/// Answers every fetch as soon as it is issued, from a table of URLs.
/// Unknown URLs are not found.
#[derive(Default)]
pub struct ImmediateLoader {
    scripts: RefCell<HashMap<String, ScriptFactory>>,
    requests: RefCell<Vec<String>>,
}

impl ImmediateLoader {
    pub fn script<F>(&self, url: &str, script: F)
    where
        F: Fn(&mut ScriptHost, WorkerId) -> Result<(), ScriptError> + Clone + 'static,
    {
        self.outcome(url, move || LoadOutcome::Fetched(Box::new(script.clone())));
    }

    /// A script that does nothing.
    pub fn empty_script(&self, url: &str) {
        self.script(url, |_: &mut ScriptHost, _: WorkerId| -> Result<(), ScriptError> { Ok(()) });
    }

    pub fn outcome(&self, url: &str, outcome: impl Fn() -> LoadOutcome + 'static) {
        self.scripts
            .borrow_mut()
            .insert(url.to_owned(), Rc::new(outcome));
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }
}

impl WorkerScriptLoader for ImmediateLoader {
    fn fetch(&self, url: &FerryUrl, _heap: HeapId) -> oneshot::Receiver<LoadOutcome> {
        self.requests.borrow_mut().push(url.to_string());
        let (sender, receiver) = oneshot::channel();
        let factory = self.scripts.borrow().get(url.as_str()).cloned();
        let outcome = match factory {
            Some(factory) => factory(),
            None => LoadOutcome::Failed(LoadFailure::NotFound),
        };
        let _ = sender.send(outcome);
        receiver
    }
}

/// Holds every fetch until the test completes it.
#[derive(Default)]
pub struct ManualLoader {
    pending: RefCell<Vec<(String, oneshot::Sender<LoadOutcome>)>>,
}

impl ManualLoader {
    /// Complete the oldest pending fetch of `url`. Returns false if there
    /// was none or the host no longer waits for it.
    pub fn complete(&self, url: &str, outcome: LoadOutcome) -> bool {
        let mut pending = self.pending.borrow_mut();
        let Some(index) = pending.iter().position(|(pending_url, _)| pending_url == url) else {
            return false;
        };
        let (_, sender) = pending.remove(index);
        sender.send(outcome).is_ok()
    }

    /// Drop the oldest pending fetch of `url` without answering it.
    pub fn abandon(&self, url: &str) -> bool {
        let mut pending = self.pending.borrow_mut();
        match pending.iter().position(|(pending_url, _)| pending_url == url) {
            Some(index) => {
                pending.remove(index);
                true
            },
            None => false,
        }
    }

    pub fn pending_urls(&self) -> Vec<String> {
        self.pending.borrow().iter().map(|(url, _)| url.clone()).collect()
    }
}

impl WorkerScriptLoader for ManualLoader {
    fn fetch(&self, url: &FerryUrl, _heap: HeapId) -> oneshot::Receiver<LoadOutcome> {
        let (sender, receiver) = oneshot::channel();
        self.pending.borrow_mut().push((url.to_string(), sender));
        receiver
    }
}

#[derive(Default)]
pub struct RecordingConsole {
    messages: RefCell<Vec<ConsoleMessage>>,
}

impl RecordingConsole {
    pub fn messages(&self) -> Vec<ConsoleMessage> {
        self.messages.borrow().clone()
    }
}

impl ConsoleSink for RecordingConsole {
    fn post_message(&self, message: ConsoleMessage) {
        self.messages.borrow_mut().push(message);
    }
}

/// Keeps every origin to itself: no cross-origin ports, no redirects.
pub struct DenyCrossOrigin;

impl SecurityPolicy for DenyCrossOrigin {
    fn allows_entanglement(&self, _accessor: &ImmutableOrigin, _target: &ImmutableOrigin) -> bool {
        false
    }

    fn allows_worker_script(&self, requester: &ImmutableOrigin, url: &FerryUrl) -> bool {
        requester.same_origin(&url.origin())
    }

    fn allows_redirect(&self, _from: &FerryUrl, _to: &FerryUrl) -> bool {
        false
    }
}

pub struct Fixture<L = ImmediateLoader> {
    pub host: ScriptHost,
    pub loader: Rc<L>,
    pub console: Rc<RecordingConsole>,
    pub prefs: PreferenceStore,
}

impl<L> Fixture<L> {
    pub fn window(&mut self) -> HeapId {
        self.window_at(PAGE_URL)
    }

    pub fn window_at(&mut self, url: &str) -> HeapId {
        self.host.new_window(url).unwrap()
    }

    pub fn console_messages(&self, source: ConsoleMessageSource) -> Vec<ConsoleMessage> {
        self.console
            .messages()
            .into_iter()
            .filter(|message| message.source == source)
            .collect()
    }
}

pub fn fixture() -> Fixture {
    fixture_with(Preferences::default(), Rc::new(script_traits::SameOriginPolicy))
}

/// A fixture whose loads stay pending until the test completes them.
pub fn manual_fixture() -> Fixture<ManualLoader> {
    fixture_with(Preferences::default(), Rc::new(script_traits::SameOriginPolicy))
}

pub fn fixture_with<L>(preferences: Preferences, security: Rc<dyn SecurityPolicy>) -> Fixture<L>
where
    L: WorkerScriptLoader + Default + 'static,
{
    init_logging();
    let loader = Rc::new(L::default());
    let console = Rc::new(RecordingConsole::default());
    let prefs = PreferenceStore::new(preferences);
    let embedder = Embedder::new(loader.clone())
        .with_security(security)
        .with_console(console.clone());
    Fixture {
        host: ScriptHost::new(embedder, &prefs),
        loader,
        console,
        prefs,
    }
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// A listener appending every event it sees to `log`.
pub fn recorder(log: &EventLog) -> EventListener {
    let log = log.clone();
    Rc::new(move |_: &mut ScriptHost, event: &Event| -> Result<(), ScriptError> {
        log.borrow_mut().push(event.clone());
        Ok(())
    })
}

/// The `data` of every message event in `log`.
pub fn message_data(log: &EventLog) -> Vec<ScriptValue> {
    log.borrow()
        .iter()
        .filter_map(|event| event.message().map(|message| message.data().clone()))
        .collect()
}

/// The inside of the worker behind `object`.
pub fn inside(host: &ScriptHost, object: WorkerObjectId) -> WorkerId {
    host.worker_object(object).and_then(Worker::worker).unwrap()
}

pub fn array(items: Vec<ScriptValue>) -> ScriptValue {
    ScriptValue::Array(items)
}

pub fn number(n: f64) -> ScriptValue {
    ScriptValue::Number(n)
}

pub fn string(s: &str) -> ScriptValue {
    ScriptValue::String(s.to_owned())
}

/// Surface a DOM exception inside a test script as an uncaught exception.
pub fn thrown(error: Error) -> ScriptError {
    ScriptError::new(error.to_string())
}
