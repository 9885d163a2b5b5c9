mod chunker;
mod dispatch_record;
mod reply_parser;
mod utterance_router;
mod wake_gate;

pub use chunker::*;
pub use dispatch_record::*;
pub use reply_parser::*;
pub use utterance_router::*;
pub use wake_gate::*;
