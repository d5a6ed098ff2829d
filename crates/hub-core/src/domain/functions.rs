//! Well-known function names.
//!
//! Devices expose their buttons as free-form functions, but the common ones
//! use the same `name` across manufacturers.  [`StandardFunction`] names them
//! so callers can write `device.standard_function(StandardFunction::Play)`
//! instead of matching strings.  The groups mirror the kinds of device:
//! everything has power, tuners and receivers add digits and navigation, and
//! players add transport controls.

/// A function whose `name` is the same on every device that has it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardFunction {
    // Power
    PowerOff,
    PowerOn,
    PowerToggle,

    // Numeric and navigation
    Number0,
    Number1,
    Number2,
    Number3,
    Number4,
    Number5,
    Number6,
    Number7,
    Number8,
    Number9,
    NumberEnter,
    DashStar,
    Pound,
    ChannelUp,
    ChannelDown,
    Up,
    Down,
    Left,
    Right,
    Select,
    Menu,
    Info,
    Exit,
    Return,
    Mute,

    // Playback
    Play,
    Pause,
    Stop,
    Rewind,
    FastForward,
    SkipBackward,
    SkipForward,
    Eject,
    VolumeUp,
    VolumeDown,
}

impl StandardFunction {
    pub const POWER: &'static [StandardFunction] = &[Self::PowerOff, Self::PowerOn, Self::PowerToggle];

    pub const NUMERIC_NAVIGATION: &'static [StandardFunction] = &[
        Self::Number0,
        Self::Number1,
        Self::Number2,
        Self::Number3,
        Self::Number4,
        Self::Number5,
        Self::Number6,
        Self::Number7,
        Self::Number8,
        Self::Number9,
        Self::NumberEnter,
        Self::DashStar,
        Self::Pound,
        Self::ChannelUp,
        Self::ChannelDown,
        Self::Up,
        Self::Down,
        Self::Left,
        Self::Right,
        Self::Select,
        Self::Menu,
        Self::Info,
        Self::Exit,
        Self::Return,
        Self::Mute,
    ];

    pub const PLAYBACK: &'static [StandardFunction] = &[
        Self::Play,
        Self::Pause,
        Self::Stop,
        Self::Rewind,
        Self::FastForward,
        Self::SkipBackward,
        Self::SkipForward,
        Self::Eject,
        Self::VolumeUp,
        Self::VolumeDown,
    ];

    /// The function `name` the hub uses.
    pub fn name(self) -> &'static str {
        match self {
            Self::PowerOff => "PowerOff",
            Self::PowerOn => "PowerOn",
            Self::PowerToggle => "PowerToggle",
            Self::Number0 => "Number0",
            Self::Number1 => "Number1",
            Self::Number2 => "Number2",
            Self::Number3 => "Number3",
            Self::Number4 => "Number4",
            Self::Number5 => "Number5",
            Self::Number6 => "Number6",
            Self::Number7 => "Number7",
            Self::Number8 => "Number8",
            Self::Number9 => "Number9",
            Self::NumberEnter => "NumberEnter",
            Self::DashStar => "Star",
            Self::Pound => "Pound",
            Self::ChannelUp => "ChannelUp",
            Self::ChannelDown => "ChannelDown",
            Self::Up => "DirectionUp",
            Self::Down => "DirectionDown",
            Self::Left => "DirectionLeft",
            Self::Right => "DirectionRight",
            Self::Select => "Select",
            Self::Menu => "Menu",
            Self::Info => "Info",
            Self::Exit => "Exit",
            Self::Return => "Return",
            Self::Mute => "Mute",
            Self::Play => "Play",
            Self::Pause => "Pause",
            Self::Stop => "Stop",
            Self::Rewind => "Rewind",
            Self::FastForward => "FastForward",
            Self::SkipBackward => "SkipBackward",
            Self::SkipForward => "SkipForward",
            Self::Eject => "Eject",
            Self::VolumeUp => "VolumeUp",
            Self::VolumeDown => "VolumeDown",
        }
    }

    /// `Number0`..`Number9` for a single decimal digit.
    pub fn number(digit: u32) -> Option<Self> {
        Self::NUMERIC_NAVIGATION.get(usize::try_from(digit).ok()?).copied().filter(|_| digit < 10)
    }
}
