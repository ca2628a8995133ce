mod membership;

pub use membership::{desired_nodes, diff, statefulset_name, NodeIdentity};
