//! Worker lifecycle management: placement, launch, crash observation, and
//! teardown of the single kernel worker a supervisor owns.

pub mod controller;

pub use controller::{
    LifecycleEvent, WorkerLifecycle, WorkerLifecycleConfig, WorkerLifecyclePerfSnapshot,
};
