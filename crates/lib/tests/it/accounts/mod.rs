//! End-to-end account manager tests, organized by lifecycle area.

mod lifecycle_tests;
mod nick_tests;
