mod shared_storage;
mod test_peer;

pub use shared_storage::SharedStorage;
pub use test_peer::{assert_converged, converge, TestPeer};
