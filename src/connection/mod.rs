// Connection module - GETTING ATTACHED
// Per-device connect / credential / disconnect state machine

mod controller;

pub use controller::ConnectionController;
