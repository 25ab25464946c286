// pool.rs - Free list of engine execution contexts.
//
// The engine's foreign functions are not guaranteed reentrant across
// concurrent invocations sharing one execution context, so each raw call
// borrows a whole instance. Instances are created lazily, returned to the
// free list after use, and never destroyed while the process runs:
// instantiation is expensive, an idle instance is cheap.

use std::sync::Mutex;

use crate::engine::{EngineInstance, EngineModule, Func};

pub(crate) struct InstancePool {
    free: Mutex<Vec<Box<dyn EngineInstance>>>,
}

impl InstancePool {
    pub(crate) fn new() -> InstancePool {
        InstancePool {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Pop an idle instance, or instantiate a new one if the free list is
    /// empty. Never blocks beyond the pop-or-create itself.
    pub(crate) fn acquire<'p>(&'p self, module: &dyn EngineModule) -> PooledInstance<'p> {
        let popped = self.free.lock().expect("instance pool poisoned").pop();
        let inst = popped.unwrap_or_else(|| module.instantiate());
        PooledInstance {
            pool: self,
            inst: Some(inst),
        }
    }

    fn release(&self, inst: Box<dyn EngineInstance>) {
        self.free.lock().expect("instance pool poisoned").push(inst);
    }
}

/// Scoped loan of an instance; returns it to the free list on drop, error
/// paths included.
pub(crate) struct PooledInstance<'p> {
    pool: &'p InstancePool,
    inst: Option<Box<dyn EngineInstance>>,
}

impl PooledInstance<'_> {
    pub(crate) fn call(&mut self, func: Func, stack: &[u64]) -> u64 {
        self.inst
            .as_mut()
            .expect("instance already returned")
            .call(func, stack)
    }
}

impl Drop for PooledInstance<'_> {
    fn drop(&mut self) {
        if let Some(inst) = self.inst.take() {
            self.pool.release(inst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingModule {
        created: AtomicUsize,
    }

    struct CountingInstance;

    impl EngineInstance for CountingInstance {
        fn call(&mut self, _func: Func, _stack: &[u64]) -> u64 {
            0
        }
    }

    impl EngineModule for CountingModule {
        fn instantiate(&self) -> Box<dyn EngineInstance> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingInstance)
        }

        fn read(&self, _ptr: u32, _len: usize) -> Vec<u8> {
            Vec::new()
        }
        fn write(&self, _ptr: u32, _data: &[u8]) {}
        fn read_u32(&self, _ptr: u32) -> u32 {
            0
        }
        fn write_u32(&self, _ptr: u32, _value: u32) {}
    }

    #[test]
    fn sequential_calls_reuse_one_instance() {
        let module = CountingModule {
            created: AtomicUsize::new(0),
        };
        let pool = InstancePool::new();
        for _ in 0..10 {
            let mut inst = pool.acquire(&module);
            inst.call(Func::Malloc, &[8]);
        }
        assert_eq!(module.created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_acquires_grow_the_pool() {
        let module = CountingModule {
            created: AtomicUsize::new(0),
        };
        let pool = InstancePool::new();
        let a = pool.acquire(&module);
        let b = pool.acquire(&module);
        drop(a);
        drop(b);
        assert_eq!(module.created.load(Ordering::SeqCst), 2);
        // Both went back to the free list; the next two acquires create
        // nothing new.
        let _a = pool.acquire(&module);
        let _b = pool.acquire(&module);
        assert_eq!(module.created.load(Ordering::SeqCst), 2);
    }
}
