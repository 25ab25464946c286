// engine.rs - The engine-module boundary: function table, guest memory
// capability, and the process-wide engine handle.
//
// The bridge never assumes it shares an address space or an allocator with
// the regex engine. Everything crosses this boundary as integers: guest
// addresses, lengths, and option flags.

use std::sync::OnceLock;

use crate::native::NativeModule;
use crate::pool::{InstancePool, PooledInstance};

/// An address inside the engine module's linear memory.
pub(crate) type GuestPtr = u32;

/// The engine's null pointer.
pub(crate) const NULL_PTR: GuestPtr = 0;

/// A pointer+length pair addressing bytes previously written into guest
/// memory. Carrying the base pointer together with the length is what lets
/// the decoder turn absolute result pointers back into caller-relative
/// offsets (see `decode`).
#[derive(Clone, Copy, Debug)]
pub(crate) struct GuestSlice {
    pub ptr: GuestPtr,
    pub len: usize,
}

/// One entry in the engine module's fixed C-style function table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Func {
    New,
    Delete,
    Match,
    ErrorCode,
    ErrorArg,
    NumCapturingGroups,
    NamedGroupsIterNew,
    NamedGroupsIterNext,
    NamedGroupsIterDelete,
    SetNew,
    SetAdd,
    SetCompile,
    SetMatch,
    SetDelete,
    GlobalReplace,
    FindAndConsume,
    Malloc,
    Free,
}

/// An isolated execution context inside the engine module.
///
/// Exclusive use is part of the contract: no instance is ever invoked
/// concurrently with itself. The pool enforces this by handing each caller
/// the boxed instance by value for the duration of one raw call.
pub(crate) trait EngineInstance: Send {
    /// Invoke `func` with the given argument stack and return the raw
    /// result. A failure of the call mechanism itself is a binding defect
    /// and must panic; it is never surfaced as a runtime error.
    fn call(&mut self, func: Func, stack: &[u64]) -> u64;
}

/// The engine module: instantiation plus byte-level random access to its
/// linear memory by absolute address.
pub(crate) trait EngineModule: Send + Sync {
    fn instantiate(&self) -> Box<dyn EngineInstance>;

    fn read(&self, ptr: GuestPtr, len: usize) -> Vec<u8>;
    fn write(&self, ptr: GuestPtr, data: &[u8]);
    fn read_u32(&self, ptr: GuestPtr) -> u32;
    fn write_u32(&self, ptr: GuestPtr, value: u32);
}

/// The active engine backend: one module plus a pool of execution contexts.
///
/// Selected once at process start and injected into every handle; nothing
/// below this point consults a global.
pub(crate) struct Engine {
    module: Box<dyn EngineModule>,
    pool: InstancePool,
}

impl Engine {
    pub(crate) fn new(module: Box<dyn EngineModule>) -> Engine {
        Engine {
            module,
            pool: InstancePool::new(),
        }
    }

    /// The process-wide engine, created on first use.
    pub(crate) fn global() -> &'static Engine {
        static ENGINE: OnceLock<Engine> = OnceLock::new();
        ENGINE.get_or_init(|| Engine::new(Box::new(NativeModule::new())))
    }

    /// Route one raw call through a pooled execution context.
    pub(crate) fn call(&self, func: Func, stack: &[u64]) -> u64 {
        let mut inst = self.acquire();
        inst.call(func, stack)
    }

    pub(crate) fn acquire(&self) -> PooledInstance<'_> {
        self.pool.acquire(&*self.module)
    }

    pub(crate) fn memory(&self) -> &dyn EngineModule {
        &*self.module
    }
}
