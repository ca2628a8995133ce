mod types;

pub use types::{OperatorConfig, PkiSettings};

#[cfg(test)]
pub(crate) use types::tests::cluster as test_cluster;
