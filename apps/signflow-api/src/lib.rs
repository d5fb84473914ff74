//! Signflow API — signature workflow service for the Parley platform
//!
//! The engine behind the HTTP surface lives in [`engine`]; everything the
//! state machine needs from the rest of the platform comes through the
//! collaborator ports in [`proposals`] and [`notify`].

pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod notify;
pub mod proposals;
pub mod state;
pub mod store;

pub use state::AppState;
