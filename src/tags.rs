use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;

use crate::errs::{EcError, EcResult};

lazy_static! {
    static ref READ_NAME_SUFFIX: Regex = Regex::new(r"[ACGT]+$").unwrap();
}

/// Character class for one IUPAC barcode letter.
fn iupac_class(x: char) -> EcResult<&'static str> {
    match x {
        'A' => Ok("A"),
        'C' => Ok("C"),
        'G' => Ok("G"),
        'T' => Ok("T"),
        'N' => Ok("[ACGT]"),
        'R' => Ok("[AG]"),
        'Y' => Ok("[CT]"),
        'K' => Ok("[GT]"),
        'M' => Ok("[AC]"),
        'S' => Ok("[CG]"),
        'W' => Ok("[AT]"),
        'B' => Ok("[CGT]"),
        'D' => Ok("[AGT]"),
        'H' => Ok("[ACT]"),
        'V' => Ok("[ACG]"),
        _ => Err(EcError::InvalidBarcode(format!("{x}"))),
    }
}

fn is_fixed_base(x: char) -> bool {
    matches!(x, 'A' | 'C' | 'G' | 'T')
}

#[derive(Debug)]
struct TagEntry {
    tag: String,
    random_prefix: usize,
    regexes: Vec<Regex>,
}

impl TagEntry {
    fn compile(tag: &str) -> EcResult<Self> {
        if tag.is_empty() {
            return Err(EcError::InvalidBarcode(tag.to_owned()));
        }
        let pattern = tag
            .chars()
            .map(|x| iupac_class(x))
            .collect::<EcResult<Vec<&str>>>()?
            .into_iter()
            .join("");
        let regex = Regex::new(&format!("^{pattern}$")).map_err(|_| {
            EcError::InvalidBarcode(tag.to_owned())
        })?;
        let random_prefix =
            tag.chars().take_while(|x| !is_fixed_base(*x)).count();
        Ok(Self {
            tag: tag.to_owned(),
            random_prefix,
            regexes: vec![regex],
        })
    }

    fn matches(&self, suffix: &str) -> bool {
        if suffix.len() < self.tag.len() {
            return false;
        }
        // read-name suffixes are as long as the barcode, test the
        // terminal barcode-length slice
        let terminal = &suffix[suffix.len() - self.tag.len()..];
        self.regexes.iter().any(|re| re.is_match(terminal))
    }
}

/// The barcode that matched a read name and the number of random
/// (ambiguity) bases before the first fixed base of the barcode.
#[derive(Debug, Eq, PartialEq)]
pub struct TagMatch<'a> {
    pub tag: &'a str,
    pub random_prefix: usize,
}

/// Matches read-name `#<suffix>` barcodes against a stable, ordered set
/// of IUPAC barcodes, first match wins.
#[derive(Debug)]
pub struct TagMatcher {
    entries: Vec<TagEntry>,
}

impl TagMatcher {
    pub fn new<T: AsRef<str>>(tags: &[T]) -> EcResult<Self> {
        let entries = tags
            .iter()
            .map(|t| TagEntry::compile(t.as_ref()))
            .collect::<EcResult<Vec<TagEntry>>>()?;
        Ok(Self { entries })
    }

    pub fn match_read_name(&self, read_name: &str) -> Option<TagMatch<'_>> {
        let suffix = READ_NAME_SUFFIX.find(read_name)?.as_str();
        self.entries.iter().find_map(|entry| {
            if entry.matches(suffix) {
                Some(TagMatch {
                    tag: entry.tag.as_str(),
                    random_prefix: entry.random_prefix,
                })
            } else {
                None
            }
        })
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.tag.as_str())
    }
}
