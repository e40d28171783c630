//! Pre-dispatch interceptor chain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::intent::ActionIntent;

/// Decision returned by an interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// Pass the (possibly rewritten) intent to the next interceptor.
    Continue,
    /// Cancel the intent. Later interceptors are not invoked.
    Prevent,
}

/// Observes and optionally rewrites or cancels intents before dispatch.
pub trait Interceptor: Send + Sync {
    /// Returns a human-readable name (used in logs and outcomes).
    fn name(&self) -> &'static str {
        "anonymous"
    }

    fn intercept(&self, intent: &mut ActionIntent) -> Interception;
}

struct FnInterceptor<F> {
    name: &'static str,
    f: F,
}

impl<F> Interceptor for FnInterceptor<F>
where
    F: Fn(&mut ActionIntent) -> Interception + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn intercept(&self, intent: &mut ActionIntent) -> Interception {
        (self.f)(intent)
    }
}

/// Handle returned by registration, used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

type Registered = (InterceptorId, Arc<dyn Interceptor>);

/// Ordered, copy-on-write list of interceptors.
///
/// Each dispatch iterates an immutable snapshot, so registrations made while
/// a chain is running only take effect for the next dispatch.
pub(crate) struct InterceptorChain {
    entries: Mutex<Arc<[Registered]>>,
    next_id: AtomicU64,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Arc::from(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn register(&self, interceptor: Arc<dyn Interceptor>) -> InterceptorId {
        let id = InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries.lock();
        let mut next: Vec<Registered> = entries.iter().cloned().collect();
        next.push((id, interceptor));
        *entries = next.into();
        id
    }

    pub fn register_fn<F>(&self, name: &'static str, f: F) -> InterceptorId
    where
        F: Fn(&mut ActionIntent) -> Interception + Send + Sync + 'static,
    {
        self.register(Arc::new(FnInterceptor { name, f }))
    }

    pub fn unregister(&self, id: InterceptorId) -> bool {
        let mut entries = self.entries.lock();
        if !entries.iter().any(|(eid, _)| *eid == id) {
            return false;
        }
        let next: Vec<Registered> = entries
            .iter()
            .filter(|(eid, _)| *eid != id)
            .cloned()
            .collect();
        *entries = next.into();
        true
    }

    pub fn snapshot(&self) -> Arc<[Registered]> {
        Arc::clone(&self.entries.lock())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.snapshot().iter().map(|(_, i)| i.name()).collect()
    }
}

/// Runs `snapshot` over `intent` in registration order. Returns the name of
/// the interceptor that prevented the intent, if any.
pub(crate) fn run_chain(snapshot: &[Registered], intent: &mut ActionIntent) -> Option<&'static str> {
    snapshot.iter().find_map(|(_, interceptor)| {
        match interceptor.intercept(intent) {
            Interception::Continue => None,
            Interception::Prevent => Some(interceptor.name()),
        }
    })
}
