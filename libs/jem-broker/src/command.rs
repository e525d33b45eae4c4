// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Command-channel opcodes.
//!
//! Opcodes use the Linux `_IO(type, nr)` encoding with type `'J'`, so they
//! can be passed verbatim through an `ioctl(2)` style control channel.

use crate::BrokerError;

/// ioctl type byte shared by every broker command.
pub const JEM_IOC_MAGIC: u8 = b'J';

const fn io(nr: u8) -> u32 {
    ((JEM_IOC_MAGIC as u32) << 8) | nr as u32
}

pub const JEM_ATTACH_DMABUF: u32 = io(1);
pub const JEM_RELEASE_DMABUF: u32 = io(2);
pub const JEM_CREATE_FD: u32 = io(3);
pub const JEM_FLUSH_ALL: u32 = io(4);

/// A decoded broker command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Register the caller's descriptor under its own number.
    Attach,
    /// Drop the entry registered under a key.
    Release,
    /// Install a new descriptor for a registered entry in the caller.
    Duplicate,
    /// Drop every entry.
    FlushAll,
}

impl Command {
    pub const ALL: [Command; 4] = [
        Command::Attach,
        Command::Release,
        Command::Duplicate,
        Command::FlushAll,
    ];

    pub fn opcode(self) -> u32 {
        match self {
            Self::Attach => JEM_ATTACH_DMABUF,
            Self::Release => JEM_RELEASE_DMABUF,
            Self::Duplicate => JEM_CREATE_FD,
            Self::FlushAll => JEM_FLUSH_ALL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attach => "ATTACH_DMABUF",
            Self::Release => "RELEASE_DMABUF",
            Self::Duplicate => "CREATE_FD",
            Self::FlushAll => "FLUSH_ALL",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = BrokerError;

    fn try_from(opcode: u32) -> Result<Self, Self::Error> {
        match opcode {
            JEM_ATTACH_DMABUF => Ok(Self::Attach),
            JEM_RELEASE_DMABUF => Ok(Self::Release),
            JEM_CREATE_FD => Ok(Self::Duplicate),
            JEM_FLUSH_ALL => Ok(Self::FlushAll),
            other => Err(BrokerError::UnknownCommand(other)),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_encoding() {
        assert_eq!(JEM_ATTACH_DMABUF, 0x4a01);
        assert_eq!(JEM_FLUSH_ALL, 0x4a04);
    }

    #[test]
    fn test_decode_every_command() {
        for command in Command::ALL {
            assert_eq!(Command::try_from(command.opcode()).unwrap(), command);
        }
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(matches!(
            Command::try_from(0x4a05),
            Err(BrokerError::UnknownCommand(0x4a05))
        ));
        assert!(matches!(
            Command::try_from(0),
            Err(BrokerError::UnknownCommand(0))
        ));
    }
}
