//! The operations behind each CLI command.

mod change;
mod dedup;
mod list;
mod recommend;
mod recover;
mod session;

pub use change::{ChangeOptions, install, remove, replace, upgrade};
pub use dedup::dedup;
pub use list::list;
pub use recommend::recommend;
pub use recover::recover;
pub use session::{Session, SessionOptions};
