//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through a full session against mock adapters.  All tests run on the
//! host (x86_64) with no real hardware required.

mod mocks;
mod supervisor_tests;
mod transfer_tests;
