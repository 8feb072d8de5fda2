//! Error taxonomy shared by every loader subsystem.
//!
//! Every fallible subsystem returns its own error enum via `Result<T, E>`. There is no
//! recovery anywhere in the loader: every error eventually reaches [`Fatal`] at the top of
//! `loader::run`, which logs it and halts.

use core::fmt::{self, Debug, Display};

/// Implemented by every error type in this crate.
///
/// Mirrors the teacher's `BaseError` trait, extended with `Display` since loader errors are
/// always surfaced to a human through the log sink, never matched on by a caller that expects
/// localized messages.
pub trait LoaderError: Debug + Display {}

/// Return type for functions that are allowed to fail and carry no success payload.
pub type CanFail<T> = Result<(), T>;

/// A config text parse failure, position-tagged so it can be printed with source context.
#[derive(Debug)]
pub struct ConfigSyntaxError {
    pub message: &'static str,
    pub line: u32,
    pub byte_offset_in_line: u32,
    pub absolute_offset: u32,
}

impl Display for ConfigSyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config syntax error at line {}, column {}: {}",
            self.line, self.byte_offset_in_line, self.message
        )
    }
}
impl LoaderError for ConfigSyntaxError {}

/// Missing mandatory key, wrong type, duplicate unique key, invalid enum literal.
#[derive(Debug)]
pub enum ConfigSemanticError {
    MissingKey { key: &'static str },
    WrongType { key: &'static str },
    DuplicateUniqueKey { key: &'static str },
    InvalidEnumLiteral { key: &'static str },
}

impl Display for ConfigSemanticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey { key } => write!(f, "missing mandatory key '{key}'"),
            Self::WrongType { key } => write!(f, "key '{key}' has the wrong type"),
            Self::DuplicateUniqueKey { key } => {
                write!(f, "key '{key}' must be unique in this scope but repeats")
            }
            Self::InvalidEnumLiteral { key } => {
                write!(f, "key '{key}' has an invalid enumerated value")
            }
        }
    }
}
impl LoaderError for ConfigSemanticError {}

/// Malformed path string or unresolvable disk/partition selector.
#[derive(Debug)]
pub enum PathError {
    Malformed,
    UnknownDisk,
    UnknownPartition,
}

impl Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed path"),
            Self::UnknownDisk => write!(f, "unknown disk selector"),
            Self::UnknownPartition => write!(f, "unknown partition selector"),
        }
    }
}
impl LoaderError for PathError {}

/// File open/read failure against a filesystem capability.
#[derive(Debug)]
pub enum IoError {
    NotFound,
    ReadFailed,
    NoMountForPath,
}

impl Display for IoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "file not found"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::NoMountForPath => write!(f, "no mounted filesystem matches the path"),
        }
    }
}
impl LoaderError for IoError {}

/// Invalid ELF, unsupported bitness, entry/segment out of range.
#[derive(Debug)]
pub enum BinaryError {
    BadMagic,
    UnsupportedClass,
    UnsupportedEncoding,
    NoLoadSegments,
    OverlappingSegments,
    EntryOutOfRange,
    Truncated,
}

impl Display for BinaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "not an ELF image"),
            Self::UnsupportedClass => write!(f, "unsupported ELF class"),
            Self::UnsupportedEncoding => write!(f, "unsupported ELF encoding"),
            Self::NoLoadSegments => write!(f, "image has no PT_LOAD segments"),
            Self::OverlappingSegments => write!(f, "PT_LOAD segments overlap"),
            Self::EntryOutOfRange => write!(f, "entry point is outside any loaded segment"),
            Self::Truncated => write!(f, "image data is truncated"),
        }
    }
}
impl LoaderError for BinaryError {}

/// A precondition required of the firmware/CPU does not hold (e.g. no long mode for a
/// 64-bit kernel).
#[derive(Debug)]
pub enum CapabilityError {
    LongModeUnavailable,
    HugePagesUnavailable,
}

impl Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LongModeUnavailable => {
                write!(f, "64-bit kernel requested but CPU has no long mode")
            }
            Self::HugePagesUnavailable => write!(f, "huge pages not supported by the CPU"),
        }
    }
}
impl LoaderError for CapabilityError {}

/// No video mode satisfies the requested constraints; a critical allocation failed.
#[derive(Debug)]
pub enum ResourceError {
    NoMatchingVideoMode,
    AllocationFailed,
}

impl Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatchingVideoMode => write!(f, "no video mode matches the constraints"),
            Self::AllocationFailed => write!(f, "a critical allocation failed"),
        }
    }
}
impl LoaderError for ResourceError {}

/// Handover protocol violation: firmware rejected `handover`, or the memory map would not
/// stabilize within the retry bound.
#[derive(Debug)]
pub enum ProtocolError {
    HandoverRejected,
    MapUnstable,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HandoverRejected => write!(f, "firmware rejected the handover request"),
            Self::MapUnstable => {
                write!(f, "memory map did not stabilize within the retry bound")
            }
        }
    }
}
impl LoaderError for ProtocolError {}

/// Union of every error kind, produced at the top of `loader::run` and handed to the fatal
/// halt handler. There is exactly one sink for this type; nothing downstream ever matches on
/// it, it is only ever logged.
#[derive(Debug)]
pub enum Fatal {
    ConfigSyntax(ConfigSyntaxError),
    ConfigSemantic(ConfigSemanticError),
    Path(PathError),
    Io(IoError),
    Binary(BinaryError),
    Capability(CapabilityError),
    Resource(ResourceError),
    Protocol(ProtocolError),
}

impl Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigSyntax(e) => Display::fmt(e, f),
            Self::ConfigSemantic(e) => Display::fmt(e, f),
            Self::Path(e) => Display::fmt(e, f),
            Self::Io(e) => Display::fmt(e, f),
            Self::Binary(e) => Display::fmt(e, f),
            Self::Capability(e) => Display::fmt(e, f),
            Self::Resource(e) => Display::fmt(e, f),
            Self::Protocol(e) => Display::fmt(e, f),
        }
    }
}
impl LoaderError for Fatal {}

macro_rules! impl_from_fatal {
    ($variant:ident, $ty:ty) => {
        impl From<$ty> for Fatal {
            fn from(e: $ty) -> Self {
                Self::$variant(e)
            }
        }
    };
}

impl_from_fatal!(ConfigSyntax, ConfigSyntaxError);
impl_from_fatal!(ConfigSemantic, ConfigSemanticError);
impl_from_fatal!(Path, PathError);
impl_from_fatal!(Io, IoError);
impl_from_fatal!(Binary, BinaryError);
impl_from_fatal!(Capability, CapabilityError);
impl_from_fatal!(Resource, ResourceError);
impl_from_fatal!(Protocol, ProtocolError);
