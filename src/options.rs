use crate::consts::MAX_OPTIONS;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Set of answer options, bit `i` standing for letter `'A' + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OptionSet(u8);

impl OptionSet {
    pub const EMPTY: OptionSet = OptionSet(0);

    pub fn from_bits(bits: u8) -> Self {
        OptionSet(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// `index` is 0 for A. Indices past the alphabet are ignored.
    pub fn single(index: u8) -> Self {
        if index < MAX_OPTIONS {
            OptionSet(1 << index)
        } else {
            OptionSet::EMPTY
        }
    }

    pub fn from_indices<I: IntoIterator<Item = u8>>(indices: I) -> Self {
        indices
            .into_iter()
            .fold(OptionSet::EMPTY, |acc, i| acc.with(i))
    }

    pub fn with(self, index: u8) -> Self {
        OptionSet(self.0 | OptionSet::single(index).0)
    }

    pub fn contains(self, index: u8) -> bool {
        index < MAX_OPTIONS && self.0 & (1 << index) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_subset_of(self, other: OptionSet) -> bool {
        self.0 & !other.0 == 0
    }

    /// True when every member is below `options`.
    pub fn fits(self, options: u8) -> bool {
        options >= MAX_OPTIONS || self.0 >> options == 0
    }

    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..MAX_OPTIONS).filter(move |&i| self.contains(i))
    }

    pub fn letters(self) -> Vec<char> {
        self.indices().map(|i| (b'A' + i) as char).collect()
    }
}

impl fmt::Display for OptionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.letters().iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for OptionSet {
    type Err = String;

    /// Accepts `"A"`, `"A,C"`, `"A|C"`, `"A C"` or `"AC"`, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = OptionSet::EMPTY;
        for c in s.chars() {
            if c == ',' || c == '|' || c.is_whitespace() {
                continue;
            }
            let upper = c.to_ascii_uppercase();
            if !upper.is_ascii_uppercase() || (upper as u8 - b'A') >= MAX_OPTIONS {
                return Err(format!("'{}' is not an answer letter (A-H)", c));
            }
            set = set.with(upper as u8 - b'A');
        }
        Ok(set)
    }
}

impl TryFrom<String> for OptionSet {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OptionSet> for String {
    fn from(set: OptionSet) -> Self {
        set.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variants_agree() {
        let expected = OptionSet::from_indices([0, 2]);
        for s in ["A,C", "a|c", "C A", "AC", " A , C "] {
            assert_eq!(s.parse::<OptionSet>().unwrap(), expected, "input {:?}", s);
        }
        assert_eq!(expected.to_string(), "A,C");
    }

    #[test]
    fn test_rejects_non_letters() {
        assert!("A,1".parse::<OptionSet>().is_err());
        assert!("Z".parse::<OptionSet>().is_err());
        assert_eq!("".parse::<OptionSet>().unwrap(), OptionSet::EMPTY);
    }

    #[test]
    fn test_fits_alphabet() {
        let set: OptionSet = "A,E".parse().unwrap();
        assert!(!set.fits(4));
        assert!(set.fits(5));
        assert!(OptionSet::single(1).is_subset_of("A,B".parse().unwrap()));
    }
}
