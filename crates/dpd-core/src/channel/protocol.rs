//! Remote-control protocol definitions
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"cmd":"get","module":"uhd","param":"txgain"}
//! <- {"status":"ok","value":"74"}
//! -> {"cmd":"set","module":"gain","param":"digital","value":"0.9"}
//! <- {"status":"ok"}
//! <- {"status":"error","message":"unknown parameter"}
//! ```

use serde::{Deserialize, Serialize};

/// Transmitter parameters the engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    TxGain,
    RxGain,
    DigitalGain,
    CoefFile,
}

impl Param {
    /// `(module, parameter)` address on the transmitter.
    pub fn address(self) -> (&'static str, &'static str) {
        match self {
            Param::TxGain => ("uhd", "txgain"),
            Param::RxGain => ("uhd", "rxgain"),
            Param::DigitalGain => ("gain", "digital"),
            Param::CoefFile => ("memlesspoly", "coeffile"),
        }
    }
}

/// Requests sent from the engine to the transmitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum RcRequest {
    Get { module: String, param: String },
    Set {
        module: String,
        param: String,
        value: String,
    },
}

impl RcRequest {
    pub fn get(param: Param) -> Self {
        let (module, param) = param.address();
        RcRequest::Get {
            module: module.to_string(),
            param: param.to_string(),
        }
    }

    pub fn set(param: Param, value: impl Into<String>) -> Self {
        let (module, param) = param.address();
        RcRequest::Set {
            module: module.to_string(),
            param: param.to_string(),
            value: value.into(),
        }
    }
}

/// Replies from the transmitter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RcReply {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<String>,
    },
    Error { message: String },
}
