pub mod fees;
pub mod pools;
pub mod positions;
pub mod service;

pub use fees::FeeCollector;
pub use pools::{PoolTick, PoolTickResolver};
pub use positions::PositionReader;
pub use service::{CacheTtls, Service, ServiceError, Snapshot};
