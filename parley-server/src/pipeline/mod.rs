mod process_stage;
mod stage;
mod stage_client;

pub use process_stage::*;
pub use stage::*;
pub use stage_client::*;
