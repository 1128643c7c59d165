//! Consumer-visible resource state and its transition function.
//!
//! The machine is deliberately pure: a transition takes the current state
//! and one event and produces the next state, with no knowledge of tasks,
//! locks or timers. That keeps every transition directly unit-testable
//! without an asynchronous harness.

use crate::error::FetchError;

/// Snapshot of one logical resource as its consumer observes it.
#[derive(Debug, Clone)]
pub struct ResourceState<V> {
    /// Last successfully fetched (or locally mutated) value.
    /// Survives revalidation and errors.
    pub data: Option<V>,

    /// Error of the most recent failed fetch. Cleared by the next success.
    pub error: Option<FetchError>,

    /// True only while the first fetch for a key with no data yet runs.
    pub is_loading: bool,

    /// True while any fetch for the key runs.
    pub is_validating: bool,
}

/// Events driving [`ResourceState`] transitions.
#[derive(Debug, Clone)]
pub enum ResourceEvent<V> {
    /// A fetch started; `has_data` decides initial-loading vs revalidating.
    FetchStarted { has_data: bool },
    FetchSucceeded(V),
    FetchFailed(FetchError),
    /// The consumer supplied a value locally, skipping the network.
    MutatedLocally(Option<V>),
    /// The resource key changed or the subscription restarted.
    Reset { initial_data: Option<V> },
}

impl<V> ResourceState<V> {
    /// State before any fetch has been issued.
    pub fn idle(initial_data: Option<V>) -> Self {
        ResourceState {
            data: initial_data,
            error: None,
            is_loading: false,
            is_validating: false,
        }
    }
}

impl<V: Clone> ResourceState<V> {
    /// Apply one event, producing the next state.
    pub fn apply(self, event: ResourceEvent<V>) -> Self {
        match event {
            ResourceEvent::FetchStarted { has_data: false } => ResourceState {
                data: self.data,
                error: None,
                is_loading: true,
                is_validating: true,
            },
            // Stale-while-revalidate: existing data stays visible.
            ResourceEvent::FetchStarted { has_data: true } => ResourceState {
                is_loading: false,
                is_validating: true,
                ..self
            },
            ResourceEvent::FetchSucceeded(value) => ResourceState {
                data: Some(value),
                error: None,
                is_loading: false,
                is_validating: false,
            },
            // A failure never clears data the consumer already has.
            ResourceEvent::FetchFailed(err) => ResourceState {
                data: self.data,
                error: Some(err),
                is_loading: false,
                is_validating: false,
            },
            ResourceEvent::MutatedLocally(Some(value)) => ResourceState {
                data: Some(value),
                error: None,
                is_loading: false,
                is_validating: false,
            },
            ResourceEvent::MutatedLocally(None) => self,
            ResourceEvent::Reset { initial_data } => ResourceState::idle(initial_data),
        }
    }
}
