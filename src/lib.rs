pub mod api;
pub mod config;
pub mod context;
pub mod counter;
pub mod dashboard;
pub mod database;
pub mod error;
pub mod identity;
pub mod logger;
pub mod repl;
pub mod retry;
pub mod session;

pub mod prelude {
    pub use derive_new::new;
    pub use serde::{Deserialize, Serialize};
    pub use snafu::{ensure, Location, OptionExt as _, ResultExt as _, Snafu};

    pub use crate::retry::{Backoff, Exhaustion};
}
