// diagram-sync-common: shared types, edit semantics and wire protocol

pub mod edit;
pub mod key;
pub mod protocol;
pub mod types;
