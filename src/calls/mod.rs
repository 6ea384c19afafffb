//! Variant-calling front-ends: thin consumers of the traversal engine.

pub mod breakpoints;
pub mod bubbles;
pub mod vcfcov;
