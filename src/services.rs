pub mod environment;
mod orchestrator;
pub mod ports;
pub mod readiness;
mod registry;
mod teardown;

pub use environment::{Collaborators, ExistingEnvironment, ProvisionedEnvironment, TestEnvironment};
pub use orchestrator::{Orchestrator, SPAWN_ORDER};
pub use ports::{TcpPortProbe, find_free_port};
pub use readiness::{ReadinessTimeouts, Wait, await_condition};
pub use registry::{ContainerRecord, ContainerRegistry};
pub use teardown::{Harvester, TeardownReport, TeardownTimeouts};
