//! Axum extractors and responses for the service crate's types.

mod context;
mod invocation;

/// An extractor for a remote type.
///
/// This is a helper type that allows extracting a type `T` from a request, where `T` is defined in
/// another crate. There must be an implementation of `FromRequestParts` or `FromRequest` for
/// `Xt<T>` for this to work. Likewise, `Xt<T>` may implement `IntoResponse`.
#[derive(Debug)]
pub struct Xt<T>(pub T);
