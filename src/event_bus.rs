/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the processing pipeline and passes them to event
//! handlers.
//!
//! When the thread receives a message containing an [event](crate::events::Event), it triggers
//! the execution of all handlers defined for the contained event type, where the handlers for
//! each event type are stored in [`EventHandlers`].
//!
//! When no handlers are present in a replica's instance of `EventHandlers` this thread is not
//! started.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the argument (for our use case, event) type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Stores the two optional handlers enabled for an event type that implements the [`Logger`]
/// trait, namely one logging handler, defined in [`logging`](crate::logging), and one
/// user-defined handler, passed to [`Replica::start`](crate::replica::Replica::start).
pub(crate) struct HandlerPair<T: Logger> {
    pub(crate) user_defined_handler: Option<HandlerPtr<T>>,
    pub(crate) logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    // Checks if no event handlers are defined for this event.
    pub(crate) fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    /// Creates a new `HandlerPair` with the user-defined handler, and the default logging
    /// handler if logging is enabled.
    pub(crate) fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn fire(&self, event: &T) {
        if let Some(handler) = &self.user_defined_handler {
            handler(event)
        }
        if let Some(handler) = &self.logging_handler {
            handler(event)
        }
    }
}

/// Stores the `HandlerPair` of user-defined and optional logging handlers for each pre-defined
/// event type from [events](crate::events).
pub(crate) struct EventHandlers {
    pub(crate) receive_request_handlers: HandlerPair<ReceiveRequestEvent>,
    pub(crate) receive_prepare_handlers: HandlerPair<ReceivePrepareEvent>,
    pub(crate) receive_commit_handlers: HandlerPair<ReceiveCommitEvent>,
    pub(crate) propose_handlers: HandlerPair<ProposeEvent>,
    pub(crate) commit_handlers: HandlerPair<CommitEvent>,
    pub(crate) retire_request_handlers: HandlerPair<RetireRequestEvent>,
    pub(crate) send_reply_handlers: HandlerPair<SendReplyEvent>,
    pub(crate) request_timeout_handlers: HandlerPair<RequestTimeoutEvent>,
}

impl EventHandlers {
    /// Creates the handler pairs for all pre-defined event types given the user-defined
    /// handlers, and information on whether logging is enabled.
    pub(crate) fn new(
        log: bool,
        receive_request_handler: Option<HandlerPtr<ReceiveRequestEvent>>,
        receive_prepare_handler: Option<HandlerPtr<ReceivePrepareEvent>>,
        receive_commit_handler: Option<HandlerPtr<ReceiveCommitEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        commit_handler: Option<HandlerPtr<CommitEvent>>,
        retire_request_handler: Option<HandlerPtr<RetireRequestEvent>>,
        send_reply_handler: Option<HandlerPtr<SendReplyEvent>>,
        request_timeout_handler: Option<HandlerPtr<RequestTimeoutEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            receive_request_handlers: HandlerPair::new(log, receive_request_handler),
            receive_prepare_handlers: HandlerPair::new(log, receive_prepare_handler),
            receive_commit_handlers: HandlerPair::new(log, receive_commit_handler),
            propose_handlers: HandlerPair::new(log, propose_handler),
            commit_handlers: HandlerPair::new(log, commit_handler),
            retire_request_handlers: HandlerPair::new(log, retire_request_handler),
            send_reply_handlers: HandlerPair::new(log, send_reply_handler),
            request_timeout_handlers: HandlerPair::new(log, request_timeout_handler),
        }
    }

    /// Checks if no handlers are defined, i.e., neither user-defined handlers were defined nor
    /// logging is enabled.
    pub(crate) fn is_empty(&self) -> bool {
        self.receive_request_handlers.is_empty()
            && self.receive_prepare_handlers.is_empty()
            && self.receive_commit_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.commit_handlers.is_empty()
            && self.retire_request_handlers.is_empty()
            && self.send_reply_handlers.is_empty()
            && self.request_timeout_handlers.is_empty()
    }

    /// Triggers the execution of each of the two handlers - the user-defined and the logging
    /// handler, if defined - for a given event type from [events](crate::events).
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::ReceiveRequest(ev) => self.receive_request_handlers.fire(&ev),
            Event::ReceivePrepare(ev) => self.receive_prepare_handlers.fire(&ev),
            Event::ReceiveCommit(ev) => self.receive_commit_handlers.fire(&ev),
            Event::Propose(ev) => self.propose_handlers.fire(&ev),
            Event::Commit(ev) => self.commit_handlers.fire(&ev),
            Event::RetireRequest(ev) => self.retire_request_handlers.fire(&ev),
            Event::SendReply(ev) => self.send_reply_handlers.fire(&ev),
            Event::RequestTimeout(ev) => self.request_timeout_handlers.fire(&ev),
        }
    }
}

/// Starts the event bus thread, which runs an infinite loop until a shutdown signal is received
/// from the parent thread. In each iteration of the loop, the thread checks if it received any
/// event notifications, and if so, then triggers the execution of the handlers defined for the
/// event.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => (),
        }
    })
}
