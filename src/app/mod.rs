mod checkpoints;
mod manager;
mod phase;
mod run;
mod workload;

pub use run::{error_policy, reconcile, Context};
