//! String comparison modifiers.

use std::fmt;
use std::ops::BitOr;

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Flag set of string comparison modifiers, combinable with `|`.
///
/// ```
/// use mellon::QueryOptions;
///
/// let both = QueryOptions::CASE_INSENSITIVE | QueryOptions::DIACRITIC_INSENSITIVE;
/// assert!(both.contains(QueryOptions::CASE_INSENSITIVE));
/// assert_eq!(both.to_string(), "[cd]");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct QueryOptions(u8);

impl QueryOptions {
    pub const NONE: Self = Self(0);
    pub const CASE_INSENSITIVE: Self = Self(1);
    pub const DIACRITIC_INSENSITIVE: Self = Self(1 << 1);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Normalizes `s` so that plain comparison honours these options.
    ///
    /// Diacritic folding decomposes to NFD and drops combining marks, so
    /// precomposed and decomposed spellings fold alike.
    #[must_use]
    pub fn fold(self, s: &str) -> String {
        let stripped: String = if self.contains(Self::DIACRITIC_INSENSITIVE) {
            s.nfd()
                .filter(|c| !is_combining_mark(*c))
                .map(strip_stroke)
                .collect()
        } else {
            s.to_string()
        };
        if self.contains(Self::CASE_INSENSITIVE) {
            stripped.to_lowercase()
        } else {
            stripped
        }
    }
}

impl BitOr for QueryOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        if self.contains(Self::CASE_INSENSITIVE) {
            f.write_str("c")?;
        }
        if self.contains(Self::DIACRITIC_INSENSITIVE) {
            f.write_str("d")?;
        }
        f.write_str("]")
    }
}

/// Letters whose diacritic is part of the glyph and has no decomposition.
fn strip_stroke(c: char) -> char {
    match c {
        'Ø' => 'O',
        'ø' => 'o',
        'Đ' => 'D',
        'đ' => 'd',
        'Ł' => 'L',
        'ł' => 'l',
        'ı' => 'i',
        other => other,
    }
}
