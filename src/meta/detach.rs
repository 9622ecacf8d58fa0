use std::ops::Deref;

/// A value cut out of the meta-gradient.
///
/// Backward passes read a `Detached` value as a constant and never propagate into whatever
/// produced it. The meta learners detach the inner-loop loss and gradient with it, so the outer
/// differentiation never goes through the inner one.
#[derive(Debug, Clone, PartialEq)]
pub struct Detached<T>(T);

/// Excludes `value` from the meta-gradient.
pub fn stop_gradient<T>(value: T) -> Detached<T> {
    Detached(value)
}

impl<T> Deref for Detached<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}
