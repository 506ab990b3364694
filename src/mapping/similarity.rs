//! Confidence scoring between a manual item and a Nayax product.
//!
//! The name carries most of the weight: the best of an edit-distance
//! ratio, a token overlap, and a containment score. Price proximity and a
//! small category bonus adjust the result. Only identical normalised names
//! can reach 100.

use serde::Serialize;

/// Weight of the name component when both prices are known.
const NAME_WEIGHT: f64 = 0.85;
const PRICE_WEIGHT: f64 = 0.15;
const CATEGORY_BONUS: f64 = 0.03;
/// Tokens of at least this length may match with a small typo.
const FUZZY_TOKEN_MIN_LEN: usize = 4;
const FUZZY_TOKEN_RATIO: f64 = 0.8;
const SIZE_UNITS: &[&str] = &["", "ml", "l", "cl", "g", "kg", "oz", "pk", "ct", "pcs"];

#[derive(Debug, Clone, Copy)]
pub struct MatchInput<'a> {
    pub name: &'a str,
    pub price: Option<f64>,
    pub category: Option<&'a str>,
}

impl<'a> MatchInput<'a> {
    pub fn new(name: &'a str, price: Option<f64>, category: Option<&'a str>) -> Self {
        Self {
            name,
            price,
            category,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

pub fn confidence_level(score: u8) -> ConfidenceLevel {
    match score {
        85..=u8::MAX => ConfidenceLevel::High,
        65..=84 => ConfidenceLevel::Medium,
        _ => ConfidenceLevel::Low,
    }
}

/// Lowercase, replace punctuation with spaces and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mapped: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_lowercase().next().unwrap_or(c)
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Pack sizes ("330ml", "2", "6pk") say little about what the product is.
fn is_size_token(token: &str) -> bool {
    let digits_end = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit() && *c != '.')
        .map(|(i, _)| i)
        .unwrap_or(token.len());
    digits_end > 0 && SIZE_UNITS.contains(&&token[digits_end..])
}

fn significant_tokens(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .filter(|t| !t.is_empty() && !is_size_token(t))
        .collect()
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// 1.0 for identical strings, 0.0 for nothing in common.
pub fn edit_ratio(a: &str, b: &str) -> f64 {
    let longest = a.chars().count().max(b.chars().count());
    if longest == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / longest as f64
}

fn tokens_match(a: &str, b: &str) -> bool {
    a == b
        || (a.chars().count() >= FUZZY_TOKEN_MIN_LEN
            && b.chars().count() >= FUZZY_TOKEN_MIN_LEN
            && edit_ratio(a, b) >= FUZZY_TOKEN_RATIO)
}

/// Dice coefficient over significant tokens, allowing small typos per token.
fn token_overlap(a: &[&str], b: &[&str]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut used = vec![false; b.len()];
    let mut matched = 0usize;
    for ta in a {
        if let Some(idx) = b
            .iter()
            .enumerate()
            .position(|(i, tb)| !used[i] && tokens_match(ta, tb))
        {
            used[idx] = true;
            matched += 1;
        }
    }
    2.0 * matched as f64 / (a.len() + b.len()) as f64
}

/// One name wholly inside the other ("cola" in "coca cola zero").
fn containment(a: &str, b: &str) -> f64 {
    let a: String = a.chars().filter(|c| !c.is_whitespace()).collect();
    let b: String = b.chars().filter(|c| !c.is_whitespace()).collect();
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.chars().count() < 3 || !long.contains(&short) {
        return 0.0;
    }
    0.6 + 0.3 * short.chars().count() as f64 / long.chars().count() as f64
}

/// Similarity of two names in [0, 1].
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_name(a);
    let nb = normalize_name(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    let ta = significant_tokens(&na);
    let tb = significant_tokens(&nb);
    edit_ratio(&na, &nb)
        .max(token_overlap(&ta, &tb))
        .max(containment(&na, &nb))
        .clamp(0.0, 1.0)
}

/// Price proximity in [0, 1], or `None` when either price is unknown.
pub fn price_similarity(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    if !a.is_finite() || !b.is_finite() || a < 0.0 || b < 0.0 {
        return None;
    }
    let largest = a.max(b);
    if largest == 0.0 {
        return Some(1.0);
    }
    Some(1.0 - ((a - b).abs() / largest).min(1.0))
}

fn same_category(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let (a, b) = (normalize_name(a), normalize_name(b));
            !a.is_empty() && a == b
        }
        _ => false,
    }
}

/// Confidence in [0, 100] that `manual` and `nayax` are the same product.
pub fn confidence(manual: &MatchInput<'_>, nayax: &MatchInput<'_>) -> u8 {
    let name = name_similarity(manual.name, nayax.name);
    let mut raw = match price_similarity(manual.price, nayax.price) {
        Some(price) => NAME_WEIGHT * name + PRICE_WEIGHT * price,
        None => name,
    };
    if name > 0.0 && same_category(manual.category, nayax.category) {
        raw += CATEGORY_BONUS;
    }

    let score = (raw.clamp(0.0, 1.0) * 100.0).round() as u8;
    let identical = normalize_name(manual.name) == normalize_name(nayax.name)
        && same_price(manual.price, nayax.price);
    if identical {
        score
    } else {
        score.min(99)
    }
}

/// Equal to the cent, or both unknown.
fn same_price(a: Option<f64>, b: Option<f64>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => (a * 100.0).round() == (b * 100.0).round(),
        _ => false,
    }
}
