/// NEC scan code for the receiving device: 16-bit address plus 8-bit command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    pub address: u16,
    pub command: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Power,
    ChannelUp,
    ChannelDown,
    DirectTune,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrCommand {
    Digit(u8),
    Action(Action),
}

impl IrCommand {
    pub fn code(self) -> Code {
        match self {
            Self::Digit(digit) => lookup_digit(digit),
            Self::Action(action) => lookup_action(action),
        }
    }
}

const DEVICE_ADDRESS: u16 = 0x40BE;

const DIGIT_COMMANDS: [u8; 10] = [
    0x4C, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B,
];

const CMD_POWER: u8 = 0x40;
const CMD_CHANNEL_UP: u8 = 0x41;
const CMD_CHANNEL_DOWN: u8 = 0x42;
const CMD_DIRECT_TUNE: u8 = 0x4D;

/// Callers validate the digit range first; a digit above 9 is a bug here,
/// not bad user input.
pub fn lookup_digit(digit: u8) -> Code {
    assert!(digit <= 9, "channel digit out of range: {digit}");
    Code {
        address: DEVICE_ADDRESS,
        command: DIGIT_COMMANDS[digit as usize],
    }
}

pub fn lookup_action(action: Action) -> Code {
    let command = match action {
        Action::Power => CMD_POWER,
        Action::ChannelUp => CMD_CHANNEL_UP,
        Action::ChannelDown => CMD_CHANNEL_DOWN,
        Action::DirectTune => CMD_DIRECT_TUNE,
    };
    Code {
        address: DEVICE_ADDRESS,
        command,
    }
}
