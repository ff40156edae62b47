//! Stateful layers built on the host operators in [`crate::ops`].

pub mod layers;

pub use layers::*;
