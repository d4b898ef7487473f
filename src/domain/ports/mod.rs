pub mod errors;
pub mod handler_store;
pub mod messaging;
pub mod script_runner;

pub use errors::StoreError;
pub use handler_store::HandlerStore;
pub use messaging::{MessagingClient, MethodResult};
pub use script_runner::{ScriptOutcome, ScriptRunner};
