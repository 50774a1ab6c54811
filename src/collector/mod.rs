pub mod session;
pub mod supervisor;
pub mod watchdog;

pub use session::CollectorHandles;
pub use supervisor::{run as run_supervisor, SupervisorConfig};
