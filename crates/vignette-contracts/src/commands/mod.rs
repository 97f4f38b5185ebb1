mod parser;
mod registry;

pub use parser::{parse_intent, Intent};
pub use registry::STUDIO_HELP_COMMANDS;
