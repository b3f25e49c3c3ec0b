//! Curve shapes (sigmoid, polynomial, spline).
//!
//! Shapes are implemented as small, pure functions so that fitting/plotting code
//! can stay generic over `ShapeKind`.

pub mod shape;

pub use shape::*;
