//! Raw FFI bindings for the COM and CLR profiling interfaces the agent touches.
//!
//! Only the vtable slots the agent calls are typed; every other slot is kept
//! as an opaque pointer so the layout still matches the native headers.

pub mod cor;
pub mod corprof;
pub mod metadata;
