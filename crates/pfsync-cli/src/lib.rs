//! pfsync-cli library: the host pieces behind the `pfsync` binary.
//!
//! Exposed as a library so integration tests can drive two hosts against
//! one directory remote without spawning processes.

pub mod app;
pub mod config;
pub mod dir_remote;
pub mod lock;
pub mod persistence;

pub use app::{App, Inspection, Status, inspect_blob};
pub use config::Config;
pub use dir_remote::DirectoryRemote;
pub use lock::FileLock;
pub use persistence::StateStore;
