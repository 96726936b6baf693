pub mod prompt;
pub mod regrade;
pub mod runner;
pub mod tool_loop;
