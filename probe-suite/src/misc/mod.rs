//! Miscellaneous OS tests.

pub mod multipath;
