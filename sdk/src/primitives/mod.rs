//! Run-scoped primitives: [`step`], [`once`], [`hook`] and [`trigger`]

pub mod hook;
pub mod once;
pub mod step;

pub use hook::{hook, named_hook, trigger, Hook, HookFuture, HookSelector};
pub use once::once;
pub use step::{step, Step, StepFuture};
