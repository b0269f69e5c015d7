// burnbin expiring paste service
// Copyright (C) 2024  The burnbin authors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use rand::prelude::Distribution;
use rand::Rng;

pub const SLUG_LENGTH: usize = 12;

/// The public identifier of a paste.
pub type Slug = ShortCode<SLUG_LENGTH>;

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortCode<const N: usize>([ShortCodeChar; N]);

impl<const N: usize> Display for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_iter(self.0.map(|v| v.0)))
    }
}

impl<const N: usize> Debug for ShortCode<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShortCode").field(&self.to_string()).finish()
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseShortCodeError {
    #[error("expected {expected} characters, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("{0:?} is not a valid short code character")]
    Char(char),
}

impl<const N: usize> FromStr for ShortCode<N> {
    type Err = ParseShortCodeError;

    fn from_str(v: &str) -> Result<Self, Self::Err> {
        let chars = v
            .chars()
            .map(|c| ShortCodeChar::try_from(c).map_err(|()| ParseShortCodeError::Char(c)))
            .collect::<Result<Vec<_>, _>>()?;

        chars
            .try_into()
            .map(Self)
            .map_err(|chars: Vec<_>| ParseShortCodeError::Length {
                expected: N,
                actual: chars.len(),
            })
    }
}

/// `ShortCodeChar` uses the Word-safe alphabet, a Base32 extension of the Open
/// Location Code Base20 alphabet. It has no vowels and no easily confused
/// glyphs (0/O, 1/l/I).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortCodeChar(char);

const ALPHABET: &[u8; 32] = b"23456789CFGHJMPQRVWXcfghjmpqrvwx";

impl TryFrom<char> for ShortCodeChar {
    type Error = ();

    fn try_from(c: char) -> Result<Self, Self::Error> {
        u8::try_from(c)
            .ok()
            .filter(|b| ALPHABET.contains(b))
            .map(|_| Self(c))
            .ok_or(())
    }
}

/// Samples uniformly from [`ALPHABET`].
pub struct Generator;

impl Distribution<ShortCodeChar> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCodeChar {
        ShortCodeChar(char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]))
    }
}

impl<const N: usize> Distribution<ShortCode<N>> for Generator {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ShortCode<N> {
        ShortCode(std::array::from_fn(|_| self.sample(rng)))
    }
}
