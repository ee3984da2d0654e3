// Library interface for feedmirror modules
// This allows tests and the binary to import modules

pub mod channel;
pub mod context;
pub mod cursor;
pub mod filter;
pub mod ledger;
pub mod links;
pub mod llm;
pub mod media;
pub mod orchestrator;
pub mod publisher;
pub mod text;
pub mod transform;
pub mod worker;
