use crate::messaging::Envelope;

/// Everything one tick of a vipo gets to see: the messages collected for
/// it during a coordinator circle, in arrival order, plus the lifecycle
/// requests that arrived in the same circle.
#[derive(Debug, Default)]
pub struct VipoJob {
    messages: Vec<Envelope>,
    start_request: bool,
    destroy_request: bool,
}

impl VipoJob {
    pub(crate) fn new() -> Self {
        VipoJob::default()
    }

    pub(crate) fn push(&mut self, envelope: Envelope) {
        self.messages.push(envelope);
    }

    pub(crate) fn request_start(&mut self) {
        self.start_request = true;
    }

    pub(crate) fn request_destroy(&mut self) {
        self.destroy_request = true;
    }

    pub(crate) fn take_messages(&mut self) -> Vec<Envelope> {
        ::std::mem::replace(&mut self.messages, Vec::new())
    }

    pub(crate) fn set_messages(&mut self, messages: Vec<Envelope>) {
        self.messages = messages;
    }

    /// In delivery order.
    pub fn messages(&self) -> &[Envelope] {
        &self.messages
    }

    /// Whether this job runs `on_start`.
    pub fn start_requested(&self) -> bool {
        self.start_request
    }

    /// Whether this is the terminal tick.
    pub fn destroy_requested(&self) -> bool {
        self.destroy_request
    }

    /// Whether either lifecycle request is set.
    pub fn any_request(&self) -> bool {
        self.start_request || self.destroy_request
    }

    /// Neither a lifecycle request nor a message.
    pub fn is_empty(&self) -> bool {
        !self.any_request() && self.messages.is_empty()
    }
}
