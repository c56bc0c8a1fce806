//! Success/failure composition helpers.
//!
//! Every fallible boundary in the pipeline returns a plain
//! [`std::result::Result`]. These helpers give the composition vocabulary
//! used by feature code (`success`, `failure`, `map`, `chain`, `unwrap_or`,
//! `fold`) as free functions, so pipelines read as a sequence of steps
//! regardless of which module produced the value.
//!
//! All functions are total and side-effect free. A failure passed through
//! [`map`] or [`chain`] is moved out unchanged, never rebuilt.

/// Wrap a value as a success.
#[inline]
pub fn success<T, E>(value: T) -> Result<T, E> {
    Ok(value)
}

/// Wrap an error as a failure.
#[inline]
pub fn failure<T, E>(error: E) -> Result<T, E> {
    Err(error)
}

/// Whether `r` holds a value.
#[inline]
#[must_use]
pub fn is_success<T, E>(r: &Result<T, E>) -> bool {
    r.is_ok()
}

/// Whether `r` holds an error.
#[inline]
#[must_use]
pub fn is_failure<T, E>(r: &Result<T, E>) -> bool {
    r.is_err()
}

/// Apply `f` to the value of a success; pass a failure through untouched.
#[inline]
pub fn map<T, U, E>(r: Result<T, E>, f: impl FnOnce(T) -> U) -> Result<U, E> {
    r.map(f)
}

/// Feed the value of a success into another fallible step.
///
/// Short-circuits on the first failure: `f` is never called for one.
#[inline]
pub fn chain<T, U, E>(r: Result<T, E>, f: impl FnOnce(T) -> Result<U, E>) -> Result<U, E> {
    r.and_then(f)
}

/// The value of a success, or `default`.
#[inline]
pub fn unwrap_or<T, E>(r: Result<T, E>, default: T) -> T {
    r.unwrap_or(default)
}

/// Exhaustive dispatch: both arms produce the same type.
#[inline]
pub fn fold<T, E, R>(
    r: Result<T, E>,
    on_success: impl FnOnce(T) -> R,
    on_failure: impl FnOnce(E) -> R,
) -> R {
    match r {
        Ok(value) => on_success(value),
        Err(error) => on_failure(error),
    }
}

/// Method form of [`fold`] for use at the end of a combinator chain.
pub trait Fold<T, E> {
    /// See [`fold`].
    fn fold<R>(self, on_success: impl FnOnce(T) -> R, on_failure: impl FnOnce(E) -> R) -> R;
}

impl<T, E> Fold<T, E> for Result<T, E> {
    #[inline]
    fn fold<R>(self, on_success: impl FnOnce(T) -> R, on_failure: impl FnOnce(E) -> R) -> R {
        fold(self, on_success, on_failure)
    }
}
