//! Subscriber registry for inbound envelopes.

use std::collections::HashMap;

use lattice_wire::Envelope;

/// Callback invoked once per inbound envelope of the subscribed event name.
pub type Handler = Box<dyn FnMut(&Envelope)>;

/// Routes inbound envelopes to external subscribers by event name.
///
/// Handlers for the same name run in registration order.
#[derive(Default)]
pub struct MessageBus {
    handlers: HashMap<String, Vec<Handler>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, event: &str, handler: F)
    where
        F: FnMut(&Envelope) + 'static,
    {
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push(Box::new(handler));
    }

    /// Invoke every handler for the envelope's event. Returns how many ran.
    pub fn dispatch(&mut self, envelope: &Envelope) -> usize {
        let Some(handlers) = self.handlers.get_mut(&envelope.event) else {
            return 0;
        };
        for handler in handlers.iter_mut() {
            handler(envelope);
        }
        handlers.len()
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field(
                "events",
                &self
                    .handlers
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.len()))
                    .collect::<HashMap<_, _>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    fn envelope(event: &str) -> Envelope {
        Envelope {
            event: event.to_string(),
            payload: Vec::new(),
        }
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = MessageBus::new();

        for tag in ["first", "second", "third"] {
            let log = Rc::clone(&log);
            bus.subscribe("chat", move |_| log.borrow_mut().push(tag));
        }

        assert_eq!(bus.dispatch(&envelope("chat")), 3);
        assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_dispatch_only_matching_event() {
        let hits = Rc::new(RefCell::new(0));
        let mut bus = MessageBus::new();
        {
            let hits = Rc::clone(&hits);
            bus.subscribe("ping", move |_| *hits.borrow_mut() += 1);
        }

        assert_eq!(bus.dispatch(&envelope("chat")), 0);
        assert_eq!(bus.dispatch(&envelope("ping")), 1);
        assert_eq!(bus.dispatch(&envelope("ping")), 1);
        assert_eq!(*hits.borrow(), 2);
    }
}
