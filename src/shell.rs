//! Fake shell persona shared by the interactive protocols.

pub mod fake_shell;
pub mod filesystem;

pub use fake_shell::{FakeShell, ShellResponse, ShellState};
pub use filesystem::FakeFilesystem;
