// Library interface for mgrep
// Exposes the engine modules so tests and external tools can drive searches

pub mod colors;
pub mod input;
pub mod matcher;
pub mod options;
pub mod output;
pub mod scan;
pub mod session;
pub mod walk;
pub mod worker;
pub mod workqueue;

#[cfg(test)]
pub mod test_utils;
