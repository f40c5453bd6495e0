//! Integration tests

mod capture_test;
mod supervisor_test;
