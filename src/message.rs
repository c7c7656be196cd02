//! Module that contains all the different message types sent in the ring.

use crate::{PeerId, Result};
use serde::{Deserialize, Serialize};

/// Struct that represents the token passed between peers to ensure mutual exclusion.
///
/// It is deliberately neither `Clone` nor `Copy`: handing it off moves it.
/// It carries the number of critical-section entries granted so far, which is
/// how the quota is counted across the whole ring.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub grants: u32,
}

/// Enum that represents the calls a peer can make on another peer.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Transfers token possession to the callee.
    GiveToken(Token),
    /// Announces that the sender has seen the quota completed.
    Done(PeerId),
    /// Asks the callee whether the requester may stop passing the token.
    StopPassingRequest(PeerId),
    /// Wakes a paused holder.
    StartPassing,
}

/// Enum that represents the possible responses to a `Request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ack,
    StopPassing { allow_stop: bool },
}

impl Token {
    /// Function that creates the one token of a ring.
    pub fn new() -> Self {
        Self { grants: 0 }
    }

    /// Records one more critical-section entry and returns the new total.
    pub fn grant(&mut self) -> u32 {
        self.grants += 1;
        self.grants
    }

    pub fn exhausted(&self, quota: u32) -> bool {
        self.grants >= quota
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl Request {
    /// Function that returns the request as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the request from a JSON formatted `String`.
    pub fn from_json_string(request: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(request)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GiveToken(_) => "GiveToken",
            Self::Done(_) => "Done",
            Self::StopPassingRequest(_) => "StopPassingRequest",
            Self::StartPassing => "StartPassing",
        }
    }
}

impl Response {
    /// Function that returns the response as a JSON formatted `String`.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the response from a JSON formatted `String`.
    pub fn from_json_string(response: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(response)?)
    }
}
