//! Push socket for local UIs

pub mod handler;
pub mod protocol;
