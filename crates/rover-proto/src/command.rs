use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Motion command understood by the robot controller.
///
/// On the wire each command is a short text token; the robot firmware
/// expects the Serbian words it was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command token: {0:?}")]
pub struct UnknownToken(pub String);

impl Command {
    pub const ALL: [Command; 5] = [
        Command::Forward,
        Command::Backward,
        Command::Left,
        Command::Right,
        Command::Stop,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Command::Forward => "napred",
            Command::Backward => "nazad",
            Command::Left => "levo",
            Command::Right => "desno",
            Command::Stop => "stop",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.token() == token)
    }

    /// Logical key names as reported by the input collaborator.
    /// Anything else is not a driving key.
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "Up" => Some(Command::Forward),
            "Down" => Some(Command::Backward),
            "Left" => Some(Command::Left),
            "Right" => Some(Command::Right),
            "space" => Some(Command::Stop),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Command {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| UnknownToken(s.to_string()))
    }
}
