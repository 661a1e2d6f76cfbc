//! Text heuristics over OCR output

pub mod names;
pub mod number;

pub use names::{NameDictionary, NameMatch, NameMatcher};
pub use number::{CardNumber, NumberParser};
