//! Transport layer abstraction.
//!
//! The client never performs I/O itself. A transport receives a fully
//! built [`RequestMessage`] and returns the buffered response.

use odata_protocol::{RequestMessage, ResponseMessage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// A request that did not produce a usable response.
///
/// Carries whatever partial response the transport obtained so that
/// observers can still inspect it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportFailure {
    /// Failure description.
    pub message: String,
    /// Partial response, if any.
    pub response: Option<ResponseMessage>,
}

impl TransportFailure {
    /// Creates a failure with no response.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            response: None,
        }
    }

    /// Attaches a partial response.
    pub fn with_response(mut self, response: ResponseMessage) -> Self {
        self.response = Some(response);
        self
    }
}

/// A blocking transport.
///
/// Non-2xx statuses are responses, not failures. Retries, if any, belong
/// to the implementation.
pub trait Transport: Send + Sync {
    /// Sends one request.
    fn send(&self, request: RequestMessage) -> Result<ResponseMessage, TransportFailure>;

    /// Best-effort abort of the request in flight.
    fn abort(&self) {}
}

/// An asynchronous transport.
///
/// The returned future is the only suspension point of a save or query.
/// Event handlers run on whatever thread polls the future to completion.
pub trait AsyncTransport: Send + Sync {
    /// Sends one request.
    fn send_async(
        &self,
        request: RequestMessage,
    ) -> impl Future<Output = Result<ResponseMessage, TransportFailure>> + Send;

    /// Best-effort abort of the request in flight.
    fn abort(&self) {}
}

/// A scripted transport for testing.
///
/// Answers requests from a queue of canned results and records every
/// request it receives. An empty queue answers with a failure.
#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<ResponseMessage, TransportFailure>>>,
    requests: Mutex<Vec<RequestMessage>>,
    aborts: AtomicUsize,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: ResponseMessage) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a transport failure.
    pub fn push_failure(&self, failure: TransportFailure) {
        self.responses.lock().push_back(Err(failure));
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RequestMessage> {
        self.requests.lock().clone()
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of queued results not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }

    /// Number of abort calls.
    pub fn abort_count(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    fn answer(&self, request: RequestMessage) -> Result<ResponseMessage, TransportFailure> {
        self.requests.lock().push(request);
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportFailure::new("no scripted response")))
    }
}

impl Transport for MockTransport {
    fn send(&self, request: RequestMessage) -> Result<ResponseMessage, TransportFailure> {
        self.answer(request)
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncTransport for MockTransport {
    fn send_async(
        &self,
        request: RequestMessage,
    ) -> impl Future<Output = Result<ResponseMessage, TransportFailure>> + Send {
        let result = self.answer(request);
        async move { result }
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}
