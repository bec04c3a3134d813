pub mod clock;
pub mod config;
pub mod core;
pub mod error;
pub mod external;
pub mod log;
pub mod orchestration;
pub mod service;
pub mod swarm;
pub mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{Error, Result};
pub use service::{SwarmHandle, SwarmService};
pub use swarm::{Collaborators, PerformanceSummary, Swarm, SwarmEvent, TeardownSummary, TickReport};
