//! External delivery channels for workflow side effects.

pub mod webhook;
