//! Session management: capability traits, fingerprints and the bounded pool.

mod automation;
mod fingerprint;
mod pool;

pub use automation::{AutomationSession, LivenessProbe, SessionFactory};
pub use fingerprint::Fingerprint;
pub use pool::{PooledSession, SessionPool, SessionPoolConfig};
