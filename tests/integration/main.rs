//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the bridge
//! against mock adapters.  All tests run on the host with no radio, flash
//! or fabric stack required.

mod bridge_flow_tests;
mod connectivity_tests;
mod mock_hw;
