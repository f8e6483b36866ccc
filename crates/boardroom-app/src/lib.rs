// Library root: the binary and the integration tests both go through these
// modules.

pub mod app;
pub mod chat;
pub mod command;
pub mod extract;
pub mod prompt;
pub mod report;

#[cfg(test)]
mod testing;
