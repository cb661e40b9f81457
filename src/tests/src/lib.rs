//! Integration tests for the Plasma Cash exit game.


pub mod exit_tests;
pub mod merkle_tests;
pub mod persistence_tests;
