use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequenceError {
    #[error("Alphabet must contain at least one symbol")]
    EmptyAlphabet,
    #[error("Alphabet contains duplicate symbol '{0}'")]
    DuplicateSymbol(char),
    #[error("Alphabet symbols must be ASCII, got '{0}'")]
    NonAsciiSymbol(char),
    #[error("Symbol '{symbol}' at position {position} is not in alphabet \"{alphabet}\"")]
    ForeignSymbol {
        symbol: char,
        position: usize,
        alphabet: String,
    },
}

/// A biological sequence (RNA, DNA or protein) as an immutable string of symbols.
///
/// Equality, ordering and hashing are by content, so sequences can key maps and sets
/// directly.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sequence(String);

impl Sequence {
    pub fn new(symbols: impl Into<String>) -> Self {
        Sequence(symbols.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable identity of this sequence: the MD5 digest of its symbols.
    pub fn digest(&self) -> [u8; 16] {
        md5::compute(self.as_bytes()).0
    }

    /// First eight hex characters of [`Sequence::digest`], used as a short id in logs.
    pub fn short_id(&self) -> String {
        format!("{:x}", md5::compute(self.as_bytes()))[..8].to_string()
    }

    /// Counts the positions holding `symbol`.
    pub fn count(&self, symbol: u8) -> usize {
        self.as_bytes().iter().filter(|&&b| b == symbol).count()
    }

    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        // Alphabets are ASCII-only, so every byte vector built from them is valid UTF-8.
        Sequence(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sequence {
    fn from(value: &str) -> Self {
        Sequence(value.to_string())
    }
}

impl From<String> for Sequence {
    fn from(value: String) -> Self {
        Sequence(value)
    }
}

/// The ordered set of symbols a sequence may be built from, e.g. `UCGA` for RNA.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Alphabet {
    symbols: Vec<u8>,
}

/// RNA nucleotides, in the order the legacy experiments used.
pub const RNA: &str = "UCGA";
/// DNA nucleotides.
pub const DNA: &str = "TCGA";
/// The twenty proteinogenic amino acids.
pub const AMINO_ACIDS: &str = "ILVAGMFYWEDQNHCRKSTP";

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Self, SequenceError> {
        if symbols.is_empty() {
            return Err(SequenceError::EmptyAlphabet);
        }
        let mut seen = Vec::with_capacity(symbols.len());
        for c in symbols.chars() {
            if !c.is_ascii() {
                return Err(SequenceError::NonAsciiSymbol(c));
            }
            let b = c as u8;
            if seen.contains(&b) {
                return Err(SequenceError::DuplicateSymbol(c));
            }
            seen.push(b);
        }
        Ok(Self { symbols: seen })
    }

    pub fn rna() -> Self {
        Self {
            symbols: RNA.as_bytes().to_vec(),
        }
    }

    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn contains(&self, symbol: u8) -> bool {
        self.symbols.contains(&symbol)
    }

    pub fn index_of(&self, symbol: u8) -> Option<usize> {
        self.symbols.iter().position(|&s| s == symbol)
    }

    /// Checks that every symbol of `sequence` belongs to this alphabet.
    pub fn validate(&self, sequence: &Sequence) -> Result<(), SequenceError> {
        match sequence
            .as_bytes()
            .iter()
            .position(|&b| !self.contains(b))
        {
            Some(position) => Err(SequenceError::ForeignSymbol {
                symbol: sequence.as_bytes()[position] as char,
                position,
                alphabet: self.to_string(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::rna()
    }
}

impl fmt::Debug for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alphabet({})", self)
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.symbols))
    }
}

impl TryFrom<String> for Alphabet {
    type Error = SequenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Alphabet::new(&value)
    }
}

impl From<Alphabet> for String {
    fn from(value: Alphabet) -> Self {
        value.to_string()
    }
}
