//! Collaborator seams implemented outside the core.

mod sender;

pub use sender::*;
