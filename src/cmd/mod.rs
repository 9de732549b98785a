//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module    | Command handled                            |
//! |-----------|---------------------------------------------|
//! | `run`     | `Run` (Orchestrator Runner over a project)   |
//! | `status`  | `Status` (Status Store readout)              |
//! | `jobs`    | `Jobs` (Job Bus registry listing)            |
//! | `logs`    | `Logs` (event stream replay/follow)          |
//! | `stop`    | `Stop` (cooperative cancellation request)    |
//! | `evolve`  | `Evolve` (self-evolution pipeline)           |

pub mod evolve;
pub mod jobs;
pub mod logs;
pub mod run;
pub mod status;
pub mod stop;

pub use evolve::cmd_evolve;
pub use jobs::cmd_jobs;
pub use logs::cmd_logs;
pub use run::cmd_run;
pub use status::cmd_status;
pub use stop::cmd_stop;
