pub mod commands;
pub mod context;
pub mod events;
pub mod grid;
pub mod history;
pub mod images;
pub mod models;
pub mod prompts;
pub mod providers;
