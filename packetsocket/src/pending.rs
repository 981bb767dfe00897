use std::collections::HashMap;

use k_lock::Mutex;

use crate::Packet;

/// Called once with the reply to a request, or with the reason no reply will come.
pub type ResponseHandler = Box<dyn FnOnce(crate::Result<Packet>) + Send + 'static>;

/// Requests on one connection that are waiting for a response.
#[derive(Default)]
pub(crate) struct PendingRequests {
    state: Mutex<PendingState>,
}

#[derive(Default)]
struct PendingState {
    next_token: u64,
    in_flight: HashMap<u64, ResponseHandler>,
    closed: bool,
}

impl std::fmt::Debug for PendingRequests {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequests")
            .field("in_flight", &self.len())
            .finish()
    }
}

impl PendingRequests {
    /// Record a handler under a fresh token. The token is not in flight on this
    /// connection until the handler is taken or deregistered.
    ///
    /// You have to register before the request is written, or else the response
    /// might arrive first and be missed.
    #[allow(clippy::expect_used)]
    pub fn register(&self, handler: ResponseHandler) -> crate::Result<u64> {
        let mut state = self
            .state
            .lock()
            .expect("brief internal mutex must work");
        if state.closed {
            return Err(crate::Error::ConnectionClosed);
        }
        let mut token = state.next_token;
        while state.in_flight.contains_key(&token) {
            token = token.wrapping_add(1);
        }
        state.next_token = token.wrapping_add(1);
        state.in_flight.insert(token, handler);
        Ok(token)
    }

    /// Remove the handler for a response, if the token is in flight.
    #[allow(clippy::expect_used)]
    pub fn take(&self, token: u64) -> Option<ResponseHandler> {
        self.state
            .lock()
            .expect("brief internal mutex must work")
            .in_flight
            .remove(&token)
    }

    /// Forget a request without calling its handler.
    pub fn deregister(&self, token: u64) -> bool {
        self.take(token).is_some()
    }

    /// Fail every request with `ConnectionClosed` and refuse new ones.
    pub fn fail_all(&self) {
        let handlers: Vec<(u64, ResponseHandler)> = {
            #[allow(clippy::expect_used)]
            let mut state = self
                .state
                .lock()
                .expect("brief internal mutex must work");
            state.closed = true;
            state.in_flight.drain().collect()
        };
        // handlers run outside the lock; they may touch the connection
        for (token, handler) in handlers {
            log::debug!("{token} failing pending request: connection closed");
            handler(Err(crate::Error::ConnectionClosed));
        }
    }

    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("brief internal mutex must work")
            .in_flight
            .len()
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use super::PendingRequests;
    use crate::Error;

    type Outcomes = Arc<Mutex<Vec<(usize, bool)>>>;

    fn recording(outcomes: &Outcomes, id: usize) -> super::ResponseHandler {
        let outcomes = outcomes.clone();
        Box::new(move |result| {
            outcomes
                .lock()
                .expect("test mutex")
                .push((id, matches!(result, Err(Error::ConnectionClosed))))
        })
    }

    #[test]
    fn tokens_are_distinct_while_in_flight() {
        let pending = PendingRequests::default();
        let outcomes = Outcomes::default();
        let a = pending.register(recording(&outcomes, 0)).expect("open");
        let b = pending.register(recording(&outcomes, 1)).expect("open");
        assert_ne!(a, b);
        assert_eq!(2, pending.len());
        assert!(pending.take(a).is_some());
        assert!(pending.take(a).is_none());
        assert!(pending.deregister(b));
        assert_eq!(0, pending.len());
        assert!(outcomes.lock().expect("test mutex").is_empty());
    }

    #[test]
    fn wrapping_skips_tokens_in_flight() {
        let pending = PendingRequests::default();
        let outcomes = Outcomes::default();
        let zero = pending.register(recording(&outcomes, 0)).expect("open");
        assert_eq!(0, zero);
        pending.state.lock().expect("test mutex").next_token = u64::MAX;
        assert_eq!(u64::MAX, pending.register(recording(&outcomes, 1)).expect("open"));
        // 0 is still in flight
        assert_eq!(1, pending.register(recording(&outcomes, 2)).expect("open"));
    }

    #[test]
    fn fail_all_calls_every_handler_once_and_closes() {
        let pending = PendingRequests::default();
        let outcomes = Outcomes::default();
        for id in 0..3 {
            pending.register(recording(&outcomes, id)).expect("open");
        }
        pending.fail_all();
        let mut outcomes_seen = outcomes.lock().expect("test mutex").clone();
        outcomes_seen.sort();
        assert_eq!(vec![(0, true), (1, true), (2, true)], outcomes_seen);
        assert!(matches!(
            pending.register(recording(&outcomes, 9)),
            Err(Error::ConnectionClosed)
        ));
        pending.fail_all();
        assert_eq!(3, outcomes.lock().expect("test mutex").len());
    }
}
