//! License key generation from guild templates.
//!
//! Template placeholders:
//! - `D` any digit
//! - `U` any uppercase English letter
//! - `L` any lowercase English letter
//! - `A` any letter or digit (no symbols)
//! - `S` any punctuation symbol
//!
//! Every other character is copied literally. `{branding}` marks where the
//! guild branding string is inserted. So `"DDDD-UUUU-LLLL-ULDS"` produces keys
//! like `"4739-EHZB-fhgt-Qp1*"`.

use rand::rngs::OsRng;
use rand::Rng;

use crate::config::limits::KEY_MIN_LENGTH;
use crate::error::{LicenseError, Result};

pub const BRANDING_PLACEHOLDER: &str = "{branding}";
pub const DEFAULT_LICENSE_FORMAT: &str = "{branding}AAAAA-AAAAA-AAAAA-AAAAA-AAAAA";
pub const MIN_PERMUTATION_COUNT: u128 = 1_000_000_000_000_000_000_000_000; // 10^24

const DIGITS: &[u8] = b"0123456789";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SYMBOLS: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Character class a template placeholder expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharClass {
    Digit,
    Uppercase,
    Lowercase,
    Alphanumeric,
    Symbol,
}

impl CharClass {
    pub fn from_placeholder(c: char) -> Option<Self> {
        match c {
            'D' => Some(CharClass::Digit),
            'U' => Some(CharClass::Uppercase),
            'L' => Some(CharClass::Lowercase),
            'A' => Some(CharClass::Alphanumeric),
            'S' => Some(CharClass::Symbol),
            _ => None,
        }
    }

    pub fn charset(self) -> &'static [u8] {
        match self {
            CharClass::Digit => DIGITS,
            CharClass::Uppercase => UPPERCASE,
            CharClass::Lowercase => LOWERCASE,
            CharClass::Alphanumeric => ALPHANUMERIC,
            CharClass::Symbol => SYMBOLS,
        }
    }

    fn random_char(self) -> char {
        let charset = self.charset();
        char::from(charset[OsRng.gen_range(0..charset.len())])
    }
}

/// Produces license keys and certifies templates.
#[derive(Debug, Clone)]
pub struct LicenseFormatter {
    min_permutation_count: u128,
}

impl Default for LicenseFormatter {
    fn default() -> Self {
        Self::new(MIN_PERMUTATION_COUNT)
    }
}

impl LicenseFormatter {
    pub fn new(min_permutation_count: u128) -> Self {
        Self {
            min_permutation_count,
        }
    }

    /// Number of distinct keys a template can produce, saturating at `u128::MAX`.
    ///
    /// Each run of identical placeholders contributes `class_size ^ run_length`,
    /// literals and the branding marker contribute nothing.
    pub fn get_format_permutations(template: &str) -> u128 {
        let template = template.replace(BRANDING_PLACEHOLDER, "");

        let mut permutations: u128 = 1;
        let mut run: Option<(CharClass, u32)> = None;

        for c in template.chars() {
            let class = CharClass::from_placeholder(c);
            match (run, class) {
                (Some((current, count)), Some(class)) if current == class => {
                    run = Some((current, count + 1));
                }
                _ => {
                    if let Some((current, count)) = run.take() {
                        permutations = permutations.saturating_mul(run_permutations(current, count));
                    }
                    run = class.map(|class| (class, 1));
                }
            }
        }

        if let Some((current, count)) = run {
            permutations = permutations.saturating_mul(run_permutations(current, count));
        }

        permutations
    }

    pub fn is_secure(&self, template: &str) -> bool {
        Self::get_format_permutations(template) >= self.min_permutation_count
    }

    /// Check a template/branding pair the way a guild setting change is checked.
    pub fn validate(&self, template: &str, branding: &str) -> Result<()> {
        let template = effective_template(template);

        if !self.is_secure(template) {
            return Err(LicenseError::configuration(format!(
                "License format '{}' is not secure enough! Not enough possible permutations! \
                 Required: {}, got: {}",
                template,
                self.min_permutation_count,
                Self::get_format_permutations(template)
            )));
        }

        let length = expanded_length(template, branding);
        if length < KEY_MIN_LENGTH {
            return Err(LicenseError::configuration(format!(
                "License format '{}' produces keys of {} characters, minimum is {}",
                template, length, KEY_MIN_LENGTH
            )));
        }

        Ok(())
    }

    /// Generate one key. An empty template means the default format.
    pub fn generate_single(&self, template: &str, branding: &str) -> Result<String> {
        self.validate(template, branding)?;
        let template = effective_template(template);

        let key = template
            .split(BRANDING_PLACEHOLDER)
            .map(|segment| {
                segment
                    .chars()
                    .map(|c| match CharClass::from_placeholder(c) {
                        Some(class) => class.random_char(),
                        None => c,
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join(branding);

        Ok(key)
    }
}

fn effective_template(template: &str) -> &str {
    if template.is_empty() {
        DEFAULT_LICENSE_FORMAT
    } else {
        template
    }
}

fn run_permutations(class: CharClass, count: u32) -> u128 {
    (class.charset().len() as u128).saturating_pow(count)
}

/// Length in characters of every key the template produces.
fn expanded_length(template: &str, branding: &str) -> usize {
    let segments: Vec<&str> = template.split(BRANDING_PLACEHOLDER).collect();
    let brandings = segments.len() - 1;
    segments.iter().map(|s| s.chars().count()).sum::<usize>() + brandings * branding.chars().count()
}
