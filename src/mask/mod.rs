//! Mask policy types: enforcement actions, dispatch modifiers and the
//! total order used to pick between simultaneous matches.
//!
//! A stored mask type is a single integer: the action verb in the low
//! nibble, modifier bits above it. The database persists the raw bits.

mod compile;
mod reference;

pub use compile::{CompiledMask, MaskError, mask_compile, mask_token};
pub use reference::{Event, build_references};

use std::fmt;
use thiserror::Error;

/// Errors from parsing or decoding a mask type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MaskTypeError {
    #[error("unknown mask action {0}")]
    UnknownAction(String),
    #[error("unknown mask modifier {0}")]
    UnknownModifier(String),
    #[error("invalid mask type bits {0}")]
    InvalidBits(i64),
}

/// The enforcement verb of a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaskAction {
    Warn,
    Kill,
    Lethal,
    Resv,
    Exclude,
}

impl MaskAction {
    const ALL: [MaskAction; 5] = [
        MaskAction::Warn,
        MaskAction::Kill,
        MaskAction::Lethal,
        MaskAction::Resv,
        MaskAction::Exclude,
    ];

    /// Action name as operators spell it.
    pub fn name(self) -> &'static str {
        match self {
            MaskAction::Warn => "WARN",
            MaskAction::Kill => "KILL",
            MaskAction::Lethal => "LETHAL",
            MaskAction::Resv => "RESV",
            MaskAction::Exclude => "EXCLUDE",
        }
    }

    fn bits(self) -> i64 {
        match self {
            MaskAction::Warn => 1,
            MaskAction::Kill => 2,
            MaskAction::Lethal => 3,
            MaskAction::Resv => 4,
            MaskAction::Exclude => 5,
        }
    }

    /// Position in the dominance order; higher wins a multi-match.
    fn rank(self) -> i64 {
        self.bits() - 1
    }

    fn from_bits(bits: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.bits() == bits)
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }
}

/// A mask's full type: action plus modifier bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskType(i64);

impl MaskType {
    /// Postpone dispatch by a randomized delay.
    pub const DELAY: i64 = 1 << 4;
    /// Shorten a DELAY to a fixed three seconds.
    pub const QUICK: i64 = 1 << 5;
    /// Log nowhere.
    pub const SILENT: i64 = 1 << 6;
    /// Log to the verbose channel only.
    pub const QUIET: i64 = 1 << 7;

    const ACTION_MASK: i64 = 0x0f;
    const MODIFIER_MASK: i64 = 0xf0;
    const MODIFIER_WIDTH: u32 = 8;

    const MODIFIERS: [(i64, &'static str); 4] = [
        (Self::DELAY, "DELAY"),
        (Self::QUICK, "QUICK"),
        (Self::SILENT, "SILENT"),
        (Self::QUIET, "QUIET"),
    ];

    /// A bare action with no modifiers.
    pub fn new(action: MaskAction) -> Self {
        MaskType(action.bits())
    }

    /// Decode stored bits, rejecting an unknown action nibble or
    /// unknown modifier bits.
    pub fn from_bits(bits: i64) -> Result<Self, MaskTypeError> {
        MaskAction::from_bits(bits & Self::ACTION_MASK)
            .ok_or(MaskTypeError::InvalidBits(bits))?;
        if bits & !(Self::ACTION_MASK | Self::MODIFIER_MASK) != 0 {
            return Err(MaskTypeError::InvalidBits(bits));
        }
        Ok(MaskType(bits))
    }

    /// Parse an operator-supplied `ACTION[|MODIFIER...]` string.
    pub fn parse(input: &str) -> Result<Self, MaskTypeError> {
        let mut parts = input.split('|');
        let action_name = parts.next().unwrap_or_default().to_uppercase();
        let action = MaskAction::from_name(&action_name)
            .ok_or(MaskTypeError::UnknownAction(action_name))?;

        let mut bits = action.bits();
        for part in parts {
            let name = part.to_uppercase();
            let (bit, _) = Self::MODIFIERS
                .iter()
                .find(|(_, n)| *n == name)
                .ok_or(MaskTypeError::UnknownModifier(name.clone()))?;
            bits |= bit;
        }
        Ok(MaskType(bits))
    }

    /// Raw bits as persisted.
    pub fn bits(self) -> i64 {
        self.0
    }

    /// The enforcement verb.
    pub fn action(self) -> MaskAction {
        MaskAction::from_bits(self.0 & Self::ACTION_MASK)
            .expect("validated at construction")
    }

    /// Modifier bits only.
    pub fn modifiers(self) -> i64 {
        self.0 & Self::MODIFIER_MASK
    }

    /// Whether a modifier bit is set.
    pub fn has(self, modifier: i64) -> bool {
        self.0 & modifier != 0
    }

    /// Add a modifier bit.
    #[must_use]
    pub fn with(self, modifier: i64) -> Self {
        MaskType(self.0 | (modifier & Self::MODIFIER_MASK))
    }

    /// Total-order weight for ranking simultaneous matches.
    ///
    /// The action is the dominant key; between equal actions, more
    /// modifier bits set wins.
    pub fn weight(self) -> i64 {
        (self.action().rank() << Self::MODIFIER_WIDTH) | self.modifiers()
    }
}

impl fmt::Display for MaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.action().name())?;
        for (bit, name) in Self::MODIFIERS {
            if self.has(bit) {
                write!(f, "|{name}")?;
            }
        }
        Ok(())
    }
}
