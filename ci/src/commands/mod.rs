// Compile commands
mod compile_check;

pub use compile_check::*;


pub use test::*;

// Documentation commands
mod doc_check;

pub use doc_check::*;
pub use doc_test::*;

// Lint commands
mod clippy;
mod format;
mod lints;

pub use clippy::*;
pub use format::*;
pub use lints::*;

// Loom test suite commands
mod loom;
mod loom_check;
mod loom_clippy;

pub use loom::*;
pub use loom_check::*;
pub use loom_clippy::*;
pub use loom_test::*;
