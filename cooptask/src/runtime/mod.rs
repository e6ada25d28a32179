// Public API
pub mod builder;
pub use builder::{Builder, InvariantPolicy};

pub mod scheduler;
pub use scheduler::{Handle, Scheduler};

pub mod request;
pub use request::{RequireCallback, RequireOptions};

mod worker;
