//! A linker either produces a valid image or it must not produce one, so
//! every error in this crate is fatal and they all flow through one anyhow
//! type. No error is caught or retried.

/// `T` defaults to `()` so that passes which only mutate the context can
/// declare plain `-> Result`.
pub(crate) type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
