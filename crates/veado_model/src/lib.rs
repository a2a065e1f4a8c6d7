//! Veado Model: a projection of the peer's avatar states.
//!
//! [`StateModel`] folds the [`ModelEvent`](veado_network::ModelEvent) stream
//! published by the controller into a map of [`RemoteState`]s and answers the
//! questions a host asks when rendering them: which states exist, what color a
//! state should be drawn in, and which image to show.

pub mod model;
pub mod state;

pub use model::StateModel;
pub use state::{RemoteState, StateColor, StateImage};
