//! Handler registry: id -> handler, resolved by linear scan.

use crate::status::Status;
use crate::wire::{Id, Payload};

/// Application callbacks for one id. Both methods are optional capabilities.
pub trait Handler {
    /// Answer an inbound request. Write the reply into `output` and return its status.
    /// Returning `None` means this handler does not serve requests; the engine then
    /// treats the id as unknown.
    fn handle_request(&mut self, input: &[u8], output: &mut Payload) -> Option<Status> {
        let _ = (input, output);
        None
    }

    /// Outcome of a request this side sent: `NoError`, `NackReceived` or `Timeout`.
    fn handle_response(&mut self, status: Status, input: &[u8]) {
        let _ = (status, input);
    }
}

type RequestFn = Box<dyn FnMut(&[u8], &mut Payload) -> Status>;
type ResponseFn = Box<dyn FnMut(Status, &[u8])>;

/// Handler built from closures, for ids that don't warrant their own type.
#[derive(Default)]
pub struct FnHandler {
    request: Option<RequestFn>,
    response: Option<ResponseFn>,
}

impl FnHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_request(mut self, f: impl FnMut(&[u8], &mut Payload) -> Status + 'static) -> Self {
        self.request = Some(Box::new(f));
        self
    }

    pub fn on_response(mut self, f: impl FnMut(Status, &[u8]) + 'static) -> Self {
        self.response = Some(Box::new(f));
        self
    }
}

impl Handler for FnHandler {
    fn handle_request(&mut self, input: &[u8], output: &mut Payload) -> Option<Status> {
        self.request.as_mut().map(|f| f(input, output))
    }

    fn handle_response(&mut self, status: Status, input: &[u8]) {
        if let Some(f) = self.response.as_mut() {
            f(status, input);
        }
    }
}

pub struct HandlerEntry {
    id: Id,
    handler: Box<dyn Handler>,
}

impl HandlerEntry {
    pub fn new(id: Id, handler: impl Handler + 'static) -> Self {
        Self {
            id,
            handler: Box::new(handler),
        }
    }

    pub fn from_boxed(id: Id, handler: Box<dyn Handler>) -> Self {
        Self { id, handler }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn handler_mut(&mut self) -> &mut dyn Handler {
        self.handler.as_mut()
    }
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry").field("id", &self.id).finish()
    }
}

/// Ordered handler table. Duplicate ids are allowed; the first one wins.
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<HandlerEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: Vec<HandlerEntry>) -> Self {
        Self { entries }
    }

    /// Replace the whole table. Meant for setup, not mid-dispatch.
    pub fn set(&mut self, entries: Vec<HandlerEntry>) {
        self.entries = entries;
    }

    pub fn lookup(&mut self, id: Id) -> Option<&mut HandlerEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
