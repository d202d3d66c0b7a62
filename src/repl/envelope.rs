//! Command Envelope Pool
//!
//! Every committed write produces one envelope on the hot path, so the
//! envelopes are recycled through a small free-list instead of hitting
//! the allocator per command. The list is deliberately tiny: it exists
//! to smooth bursts, not to bound memory.

use parking_lot::Mutex;

/// Maximum envelopes kept for reuse; excess returns are dropped
const POOL_CAPACITY: usize = 10;

/// A namespace-tagged, already-encoded command bound for the reactor
#[derive(Debug, Default)]
pub struct ReplEnvelope {
    /// Namespace the command executes in
    pub ns: String,
    /// Encoded protocol bytes of the command
    pub buf: Vec<u8>,
}

/// Bounded LIFO free-list of envelopes
#[derive(Debug, Default)]
pub struct EnvelopePool {
    free: Mutex<Vec<Box<ReplEnvelope>>>,
}

impl EnvelopePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pop a recycled envelope (buffer cleared, capacity retained) or
    /// allocate a fresh one.
    pub fn acquire(&self) -> Box<ReplEnvelope> {
        if let Some(mut env) = self.free.lock().pop() {
            env.ns.clear();
            env.buf.clear();
            return env;
        }
        Box::default()
    }

    /// Return an envelope for reuse; dropped when the pool is full.
    pub fn release(&self, env: Box<ReplEnvelope>) {
        let mut free = self.free.lock();
        if free.len() < POOL_CAPACITY {
            free.push(env);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.free.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_recycles() {
        let pool = EnvelopePool::new();
        let mut env = pool.acquire();
        env.ns.push_str("db0");
        env.buf.extend_from_slice(b"payload");
        let cap = env.buf.capacity();
        pool.release(env);

        let env = pool.acquire();
        assert!(env.ns.is_empty());
        assert!(env.buf.is_empty());
        assert_eq!(env.buf.capacity(), cap);
    }

    #[test]
    fn test_pool_bounded() {
        let pool = EnvelopePool::new();
        let envs: Vec<_> = (0..POOL_CAPACITY + 5).map(|_| pool.acquire()).collect();
        for env in envs {
            pool.release(env);
        }
        assert_eq!(pool.len(), POOL_CAPACITY);
    }
}
