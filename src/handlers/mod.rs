pub mod webhook;

pub use webhook::incoming_call;
