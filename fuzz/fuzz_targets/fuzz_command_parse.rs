//! Fuzz target: `BridgeCommand::parse`
//!
//! Console input is untrusted; parsing must never panic and an accepted
//! label must stay within its bound.
//!
//! cargo fuzz run fuzz_command_parse

#![no_main]

use blebridge::app::commands::BridgeCommand;
use blebridge::config::MAX_NODE_LABEL_LEN;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };
    if let Ok(BridgeCommand::Add { label, .. }) = BridgeCommand::parse(line) {
        assert!(label.len() <= MAX_NODE_LABEL_LEN);
    }
});
