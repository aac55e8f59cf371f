//! The state handler capability: user-defined per-event logic.
//!
//! The core never interprets state or event payloads; it only calls the
//! handler through this narrow interface. Any error a handler returns is
//! fatal to its projection instance and to nothing else.

use eventide_events::EmittedEvent;

use crate::message::CommittedEventReceived;

/// Result of processing one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Replacement state; `None` leaves the state unchanged.
    pub new_state: Option<String>,
    pub emitted_events: Vec<EmittedEvent>,
}

impl ProcessOutput {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn state(new_state: impl Into<String>) -> Self {
        Self {
            new_state: Some(new_state.into()),
            emitted_events: Vec::new(),
        }
    }

    pub fn with_emitted(mut self, event: EmittedEvent) -> Self {
        self.emitted_events.push(event);
        self
    }
}

pub trait StateHandler: Send {
    /// State of a projection that has never processed anything.
    fn initial_state(&mut self) -> String;

    /// Rehydrate state from a persisted checkpoint snapshot.
    fn load_state(&mut self, persisted: &str) -> anyhow::Result<String>;

    /// Process one event against the current state.
    fn process(&mut self, state: &str, event: &CommittedEventReceived) -> anyhow::Result<ProcessOutput>;
}

impl<H: StateHandler + ?Sized> StateHandler for Box<H> {
    fn initial_state(&mut self) -> String {
        (**self).initial_state()
    }

    fn load_state(&mut self, persisted: &str) -> anyhow::Result<String> {
        (**self).load_state(persisted)
    }

    fn process(&mut self, state: &str, event: &CommittedEventReceived) -> anyhow::Result<ProcessOutput> {
        (**self).process(state, event)
    }
}

/// Handler built from a closure; persisted state is loaded verbatim.
pub struct FnStateHandler<F> {
    initial: String,
    process: F,
}

impl<F> FnStateHandler<F>
where
    F: FnMut(&str, &CommittedEventReceived) -> anyhow::Result<ProcessOutput> + Send,
{
    pub fn new(initial: impl Into<String>, process: F) -> Self {
        Self {
            initial: initial.into(),
            process,
        }
    }
}

impl<F> StateHandler for FnStateHandler<F>
where
    F: FnMut(&str, &CommittedEventReceived) -> anyhow::Result<ProcessOutput> + Send,
{
    fn initial_state(&mut self) -> String {
        self.initial.clone()
    }

    fn load_state(&mut self, persisted: &str) -> anyhow::Result<String> {
        Ok(persisted.to_string())
    }

    fn process(&mut self, state: &str, event: &CommittedEventReceived) -> anyhow::Result<ProcessOutput> {
        (self.process)(state, event)
    }
}
