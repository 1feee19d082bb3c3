//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance.

pub mod scaled_dot_product;

pub use scaled_dot_product::ScaledDotProductAttention;
