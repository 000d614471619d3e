//! Inbound commands to the bridge.
//!
//! These represent actions requested over the serial CLI that the
//! [`Bridge`](super::service::Bridge) interprets and acts upon.
//!
//! ```text
//! add <deviceType> [radioIndex] [nodeLabel]
//! remove <endpointId>
//! scan
//! ```
//!
//! Numbers are decimal or `0x` hex.  A second `add` argument that parses
//! as a number is the index into the last scan's results; anything else
//! starts the label, which runs to the end of the line.

use crate::adapters::utils::{is_printable_ascii, parse_u16};
use crate::config::MAX_NODE_LABEL_LEN;
use crate::devices::DeviceType;
use crate::error::{BridgeError, Result};

pub type NodeLabel = heapless::String<MAX_NODE_LABEL_LEN>;

/// Commands the CLI can send into the bridge core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    /// Bridge a new device.  With `radio_index` the device is paired with
    /// that scan result; without one it is simulated.
    Add {
        device_type: DeviceType,
        radio_index: Option<u8>,
        label: NodeLabel,
    },

    Remove { endpoint_id: u16 },

    /// Start a discovery scan with the configured window.
    Scan,
}

impl BridgeCommand {
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(BridgeError::InvalidArgument)?;
        match verb {
            "add" => {
                let raw_type = tokens.next().and_then(parse_u16).ok_or(BridgeError::InvalidArgument)?;
                let device_type = DeviceType::from_u16(raw_type).ok_or(BridgeError::InvalidArgument)?;

                let mut rest = tokens.peekable();
                let radio_index = match rest.peek().and_then(|t| parse_u16(t)) {
                    Some(n) => {
                        rest.next();
                        Some(u8::try_from(n).map_err(|_| BridgeError::InvalidArgument)?)
                    }
                    None => None,
                };

                let mut label = NodeLabel::new();
                for (n, word) in rest.enumerate() {
                    if n > 0 {
                        label.push(' ').map_err(|_| BridgeError::InvalidArgument)?;
                    }
                    label.push_str(word).map_err(|_| BridgeError::InvalidArgument)?;
                }
                if !is_printable_ascii(&label) {
                    return Err(BridgeError::InvalidArgument);
                }
                Ok(Self::Add {
                    device_type,
                    radio_index,
                    label,
                })
            }
            "remove" => {
                let endpoint_id = tokens.next().and_then(parse_u16).ok_or(BridgeError::InvalidArgument)?;
                if tokens.next().is_some() {
                    return Err(BridgeError::InvalidArgument);
                }
                Ok(Self::Remove { endpoint_id })
            }
            "scan" if tokens.next().is_none() => Ok(Self::Scan),
            _ => Err(BridgeError::InvalidArgument),
        }
    }
}
