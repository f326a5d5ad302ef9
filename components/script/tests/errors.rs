/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

mod common;

use std::cell::Cell;
use std::rc::Rc;

use base::id::WorkerId;
use common::{EventLog, PAGE_URL, fixture, inside, number, recorder, thrown};
use script::ScriptHost;
use script::dom::abstractworker::WorkerKind;
use script::dom::event::{Event, EventTargetId, EventType};
use script::dom::eventqueue::WorkerQueue;
use script::dom::eventtarget::EventListener;
use script::dom::messagechannel::MessageChannel;
use script::dom::messageport::MessagePort;
use script::dom::worker::Worker;
use script::dom::workerglobalscope::WorkerGlobalScope;
use script_traits::{ConsoleMessageSource, ScriptError};

const WORKER_URL: &str = "https://example.com/worker.js";

fn boom() -> ScriptError {
    ScriptError::new("boom").at(WORKER_URL, 3, 7)
}

fn throwing_script(_: &mut ScriptHost, _: WorkerId) -> Result<(), ScriptError> {
    Err(boom())
}

fn canceler() -> EventListener {
    Rc::new(|_: &mut ScriptHost, event: &Event| -> Result<(), ScriptError> {
        event.prevent_default();
        Ok(())
    })
}

#[test]
fn test_worker_onerror_can_cancel() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script(
        WORKER_URL,
        |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            WorkerGlobalScope::set_event_handler(host, worker, EventType::Error, Some(canceler()))
                .map_err(thrown)?;
            Err(boom())
        },
    );
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    let errors = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&errors)).unwrap();

    f.host.process_pending_loads();

    assert!(errors.borrow().is_empty());
    assert!(f.console_messages(ConsoleMessageSource::UncaughtError).is_empty());
    // A script that threw still leaves a running worker.
    let worker = inside(&f.host, object);
    assert!(f.host.worker(worker).unwrap().is_enabled());
}

#[test]
fn test_unhandled_error_reaches_the_worker_object() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script(WORKER_URL, throwing_script);
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    let errors = EventLog::default();
    Worker::set_event_handler(&mut f.host, object, EventType::Error, Some(recorder(&errors)))
        .unwrap();

    f.host.process_pending_loads();

    let events = errors.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].target(), EventTargetId::Worker(object));
    let error = events[0].error().unwrap();
    assert_eq!(error.message(), "boom");
    assert_eq!(error.filename(), WORKER_URL);
    assert_eq!(error.lineno(), 3);
    assert_eq!(error.colno(), 7);
    assert_eq!(error.error(), Some(&boom()));

    // Not canceled, so the console hears about it too.
    let uncaught = f.console_messages(ConsoleMessageSource::UncaughtError);
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].message, "Uncaught boom (https://example.com/worker.js:3:7)");
    assert_eq!(uncaught[0].url, WORKER_URL);
    assert_eq!(uncaught[0].line, 3);
}

#[test]
fn test_worker_object_onerror_can_cancel() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script(WORKER_URL, throwing_script);
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    Worker::set_event_handler(&mut f.host, object, EventType::Error, Some(canceler())).unwrap();

    f.host.process_pending_loads();
    assert!(f.console_messages(ConsoleMessageSource::UncaughtError).is_empty());
}

#[test]
fn test_unheard_error_is_queued_on_both_sides() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script(WORKER_URL, throwing_script);
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();

    f.host.process_pending_loads();
    assert_eq!(f.console_messages(ConsoleMessageSource::UncaughtError).len(), 1);

    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();
    assert_eq!(outside.borrow().len(), 1);
    assert_eq!(outside.borrow()[0].target(), EventTargetId::Worker(object));
    assert_eq!(outside.borrow()[0].error().unwrap().message(), "boom");

    let worker = inside(&f.host, object);
    let within = EventLog::default();
    WorkerGlobalScope::add_event_listener(&mut f.host, worker, EventType::Error, recorder(&within))
        .unwrap();
    assert_eq!(within.borrow().len(), 1);
    assert_eq!(
        within.borrow()[0].target(),
        EventTargetId::WorkerGlobalScope(worker)
    );
}

#[test]
fn test_error_under_a_shared_parent_goes_to_the_console() {
    let mut f = fixture();
    let window = f.window();
    let child_errors = EventLog::default();
    let log = child_errors.clone();
    f.loader.script(
        "https://example.com/shared.js",
        move |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            let heap = host.worker(worker).unwrap().heap();
            let child = Worker::construct(host, heap, "child.js", WorkerKind::Dedicated)
                .map_err(thrown)?;
            Worker::add_event_listener(host, child, EventType::Error, recorder(&log))
                .map_err(thrown)
        },
    );
    f.loader.script(
        "https://example.com/child.js",
        |_: &mut ScriptHost, _: WorkerId| -> Result<(), ScriptError> {
            Err(ScriptError::new("child failed").at("https://example.com/child.js", 2, 1))
        },
    );
    Worker::construct(
        &mut f.host,
        window,
        "shared.js",
        WorkerKind::Shared(String::new()),
    )
    .unwrap();

    assert_eq!(f.host.process_pending_loads(), 2);

    assert!(child_errors.borrow().is_empty());
    let uncaught = f.console_messages(ConsoleMessageSource::UncaughtError);
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].url, "https://example.com/shared.js");
    assert_eq!(
        uncaught[0].message,
        "Uncaught child failed (https://example.com/child.js:2:1)"
    );
}

/// A parent script that starts `child.js` and listens for errors with
/// `listener`.
fn parent_script(
    listener: EventListener,
) -> impl Fn(&mut ScriptHost, WorkerId) -> Result<(), ScriptError> + Clone + 'static {
    move |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
        WorkerGlobalScope::add_event_listener(host, worker, EventType::Error, listener.clone())
            .map_err(thrown)?;
        let heap = host.worker(worker).unwrap().heap();
        Worker::construct(host, heap, "child.js", WorkerKind::Dedicated).map_err(thrown)?;
        Ok(())
    }
}

#[test]
fn test_dedicated_parent_can_cancel_a_child_error() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script("https://example.com/parent.js", parent_script(canceler()));
    f.loader.script("https://example.com/child.js", throwing_script);
    let object = Worker::construct(&mut f.host, window, "parent.js", WorkerKind::Dedicated).unwrap();
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();

    assert_eq!(f.host.process_pending_loads(), 2);
    assert!(outside.borrow().is_empty());
    assert!(f.console_messages(ConsoleMessageSource::UncaughtError).is_empty());
}

#[test]
fn test_uncanceled_child_error_climbs_to_the_parent_object() {
    let mut f = fixture();
    let window = f.window();
    let within = EventLog::default();
    f.loader.script("https://example.com/parent.js", parent_script(recorder(&within)));
    f.loader.script("https://example.com/child.js", throwing_script);
    let object = Worker::construct(&mut f.host, window, "parent.js", WorkerKind::Dedicated).unwrap();
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();

    f.host.process_pending_loads();

    let parent = inside(&f.host, object);
    assert_eq!(within.borrow().len(), 1);
    assert_eq!(
        within.borrow()[0].target(),
        EventTargetId::WorkerGlobalScope(parent)
    );
    assert_eq!(outside.borrow().len(), 1);
    assert_eq!(outside.borrow()[0].error().unwrap().message(), "boom");
    let uncaught = f.console_messages(ConsoleMessageSource::UncaughtError);
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].url, "https://example.com/parent.js");
}

#[test]
fn test_exception_is_marked_in_flight_while_handled() {
    let mut f = fixture();
    let window = f.window();
    let observed = Rc::new(Cell::new(None));
    let seen = observed.clone();
    f.loader.script(
        WORKER_URL,
        move |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            let seen = seen.clone();
            let onerror: EventListener = Rc::new(
                move |host: &mut ScriptHost, event: &Event| -> Result<(), ScriptError> {
                    let signature = event.error().unwrap().signature();
                    seen.set(Some(
                        host.worker(worker).unwrap().is_processing_exception(&signature),
                    ));
                    Ok(())
                },
            );
            WorkerGlobalScope::set_event_handler(host, worker, EventType::Error, Some(onerror))
                .map_err(thrown)?;
            Err(boom())
        },
    );
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();

    f.host.process_pending_loads();

    assert_eq!(observed.get(), Some(true));
    let worker = inside(&f.host, object);
    assert!(!f
        .host
        .worker(worker)
        .unwrap()
        .is_processing_exception(&boom().signature()));
}

#[test]
fn test_rethrown_exception_is_handled_once() {
    let mut f = fixture();
    let window = f.window();
    let calls = Rc::new(Cell::new(0));
    let counter = calls.clone();
    f.loader.script(
        WORKER_URL,
        move |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            let counter = counter.clone();
            let rethrow: EventListener = Rc::new(
                move |_: &mut ScriptHost, _: &Event| -> Result<(), ScriptError> {
                    counter.set(counter.get() + 1);
                    Err(boom())
                },
            );
            WorkerGlobalScope::set_event_handler(host, worker, EventType::Error, Some(rethrow))
                .map_err(thrown)?;
            Err(boom())
        },
    );
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();

    f.host.process_pending_loads();

    assert_eq!(calls.get(), 1);
    assert_eq!(outside.borrow().len(), 1);
    assert_eq!(f.console_messages(ConsoleMessageSource::UncaughtError).len(), 1);
}

/// An error listener that counts its calls and, when `rethrow` is set,
/// throws `boom` again.
fn counting(calls: &Rc<Cell<u32>>, rethrow: bool) -> EventListener {
    let calls = calls.clone();
    Rc::new(move |_: &mut ScriptHost, _: &Event| -> Result<(), ScriptError> {
        calls.set(calls.get() + 1);
        if rethrow { Err(boom()) } else { Ok(()) }
    })
}

#[test]
fn test_worker_onerror_runs_once_when_the_object_is_deaf() {
    let mut f = fixture();
    let window = f.window();
    let calls = Rc::new(Cell::new(0));
    let onerror = counting(&calls, false);
    f.loader.script(
        WORKER_URL,
        move |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            WorkerGlobalScope::set_event_handler(
                host,
                worker,
                EventType::Error,
                Some(onerror.clone()),
            )
            .map_err(thrown)?;
            Err(boom())
        },
    );
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();

    f.host.process_pending_loads();
    assert_eq!(calls.get(), 1);
    assert_eq!(f.console_messages(ConsoleMessageSource::UncaughtError).len(), 1);

    // Only the outside copy waits in a queue.
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();
    assert_eq!(outside.borrow().len(), 1);
    let worker = inside(&f.host, object);
    assert!(f.host.worker(worker).unwrap().queue(WorkerQueue::Error).is_empty());
    assert_eq!(calls.get(), 1);
}

#[test]
fn test_rethrowing_parent_onerror_is_handled_once() {
    let mut f = fixture();
    let window = f.window();
    let calls = Rc::new(Cell::new(0));
    f.loader.script(
        "https://example.com/parent.js",
        parent_script(counting(&calls, true)),
    );
    f.loader.script("https://example.com/child.js", throwing_script);
    let object = Worker::construct(&mut f.host, window, "parent.js", WorkerKind::Dedicated).unwrap();
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();

    assert_eq!(f.host.process_pending_loads(), 2);

    assert_eq!(calls.get(), 1);
    assert_eq!(outside.borrow().len(), 1);
    assert_eq!(outside.borrow()[0].error().unwrap().message(), "boom");
    let uncaught = f.console_messages(ConsoleMessageSource::UncaughtError);
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].url, "https://example.com/parent.js");
    let parent = inside(&f.host, object);
    assert!(!f
        .host
        .worker(parent)
        .unwrap()
        .is_processing_exception(&boom().signature()));
}

#[test]
fn test_throwing_message_listener_in_a_worker() {
    let mut f = fixture();
    let window = f.window();
    f.loader.script(
        WORKER_URL,
        |host: &mut ScriptHost, worker: WorkerId| -> Result<(), ScriptError> {
            let onmessage: EventListener = Rc::new(
                |_: &mut ScriptHost, _: &Event| -> Result<(), ScriptError> {
                    Err(ScriptError::new("bad message").at(WORKER_URL, 9, 1))
                },
            );
            WorkerGlobalScope::set_event_handler(host, worker, EventType::Message, Some(onmessage))
                .map_err(thrown)
        },
    );
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    let outside = EventLog::default();
    Worker::add_event_listener(&mut f.host, object, EventType::Error, recorder(&outside)).unwrap();
    f.host.process_pending_loads();

    Worker::post_message(&mut f.host, object, &number(1.0), None).unwrap();

    let events = outside.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].error().unwrap().message(), "bad message");
    assert_eq!(events[0].error().unwrap().lineno(), 9);
}

#[test]
fn test_throwing_listener_in_a_window_goes_to_the_console() {
    let mut f = fixture();
    let window = f.window();
    let channel = MessageChannel::new(&mut f.host, window).unwrap();
    let onmessage: EventListener = Rc::new(
        |_: &mut ScriptHost, _: &Event| -> Result<(), ScriptError> {
            Err(ScriptError::new("bad").at(PAGE_URL, 4, 2))
        },
    );
    MessagePort::set_onmessage(&mut f.host, channel.port2(), Some(onmessage)).unwrap();

    MessagePort::post_message(&mut f.host, channel.port1(), &number(1.0), None).unwrap();

    let uncaught = f.console_messages(ConsoleMessageSource::UncaughtError);
    assert_eq!(uncaught.len(), 1);
    assert_eq!(uncaught[0].url, PAGE_URL);
    assert_eq!(uncaught[0].line, 4);
    assert_eq!(
        uncaught[0].message,
        "Uncaught bad (https://example.com/index.html:4:2)"
    );
}

#[test]
fn test_errors_after_close_are_ignored() {
    let mut f = fixture();
    let window = f.window();
    f.loader.empty_script(WORKER_URL);
    let object = Worker::construct(&mut f.host, window, "worker.js", WorkerKind::Dedicated).unwrap();
    f.host.process_pending_loads();
    let worker = inside(&f.host, object);

    WorkerGlobalScope::close(&mut f.host, worker);
    WorkerGlobalScope::handle_error(&mut f.host, worker, &boom());
    assert!(f.console_messages(ConsoleMessageSource::UncaughtError).is_empty());
}
