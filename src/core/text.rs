//! Text normalizer (C2): HTML/whitespace/case cleanup, abbreviation expansion,
//! a character-similarity ratio, and the direction-mismatch predicate shared by
//! the outcome feature and the hard-constraint checker.

use std::collections::HashMap;

const LEADING_PREFIXES: &[&str] = &[
    "will ", "will the ", "does ", "is ", "are ", "can ", "should ", "what if ",
];

lazy_static::lazy_static! {
    static ref ABBREVIATIONS: HashMap<&'static str, &'static str> = HashMap::from([
        ("fed", "federal reserve"),
        ("fomc", "federal open market committee"),
        ("cpi", "consumer price index"),
        ("gdp", "gross domestic product"),
        ("bls", "bureau of labor statistics"),
        ("ecb", "european central bank"),
        ("sec", "securities and exchange commission"),
        ("ftc", "federal trade commission"),
        ("doj", "department of justice"),
        ("nfp", "nonfarm payrolls"),
        ("ipo", "initial public offering"),
        ("eoy", "end of year"),
        ("q1", "first quarter"),
        ("q2", "second quarter"),
        ("q3", "third quarter"),
        ("q4", "fourth quarter"),
    ]);
}

/// Antonym pairs used to detect that two titles assert opposite directions.
const ANTONYM_PAIRS: &[(&str, &str)] = &[
    ("over", "under"),
    ("above", "below"),
    ("higher", "lower"),
    ("more than", "less than"),
    ("wins", "loses"),
    ("win", "lose"),
    ("yes", "no"),
    ("will", "won't"),
    ("up", "down"),
    ("increase", "decrease"),
    ("pass", "fail"),
    ("approve", "reject"),
];

fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_prefix(text: &str) -> String {
    let lower = text.to_lowercase();
    for prefix in LEADING_PREFIXES {
        if lower.starts_with(prefix) {
            return text[prefix.len()..].to_string();
        }
    }
    text.to_string()
}

fn expand_abbreviations(text: &str) -> String {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            let key = w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase();
            ABBREVIATIONS
                .get(key.as_str())
                .map(|expanded| expanded.to_string())
                .unwrap_or_else(|| w.to_string())
        })
        .collect();
    words.join(" ")
}

/// Cleans raw text: strip HTML, collapse whitespace, lowercase, trim a leading
/// question prefix, expand known abbreviations.
pub fn clean_text(raw: &str) -> String {
    let stripped = strip_html(raw);
    let collapsed = collapse_whitespace(&stripped);
    let trimmed = strip_leading_prefix(&collapsed);
    let lowered = trimmed.to_lowercase();
    expand_abbreviations(&lowered)
}

/// Character-level similarity ratio in [0, 1], via a Levenshtein-distance ratio
/// (`1 - distance / max_len`).
pub fn char_similarity_ratio(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }

    let distance = levenshtein(&a_chars, &b_chars);
    1.0 - (distance as f64 / max_len as f64)
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Negation words whose presence in a title flips the implied Yes/No polarity.
const NEGATION_WORDS: &[&str] = &[
    "won't", "wont", "will not", "not ", "never", "fails to", "failing to", "doesn't",
    "does not", "isn't", "is not", "n't",
];

/// Infers a YesNo contract's polarity from negation words in its cleaned
/// title, per §4.5. A title phrased in the negative ("Fed won't hike rates")
/// is `Polarity::Negative`; everything else defaults to `Positive`.
pub fn infer_polarity(cleaned_title_lower: &str) -> crate::core::contract::Polarity {
    if NEGATION_WORDS
        .iter()
        .any(|word| cleaned_title_lower.contains(word))
    {
        crate::core::contract::Polarity::Negative
    } else {
        crate::core::contract::Polarity::Positive
    }
}

/// True when the two titles carry opposite directional words from a fixed set
/// of antonym pairs — e.g. "over 45.5" vs "under 45.5".
pub fn detect_direction_mismatch(title_a: &str, title_b: &str) -> bool {
    let a = title_a.to_lowercase();
    let b = title_b.to_lowercase();

    for (word, antonym) in ANTONYM_PAIRS {
        let a_has_word = a.contains(word);
        let a_has_antonym = a.contains(antonym);
        let b_has_word = b.contains(word);
        let b_has_antonym = b.contains(antonym);

        if (a_has_word && !a_has_antonym && b_has_antonym && !b_has_word)
            || (a_has_antonym && !a_has_word && b_has_word && !b_has_antonym)
        {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_strips_html_and_prefix() {
        let cleaned = clean_text("Will the <b>Fed</b> hike rates?");
        assert_eq!(cleaned, "federal reserve hike rates?");
    }

    #[test]
    fn char_similarity_identical_strings_is_one() {
        assert_eq!(char_similarity_ratio("bitcoin", "bitcoin"), 1.0);
    }

    #[test]
    fn char_similarity_empty_strings_is_one() {
        assert_eq!(char_similarity_ratio("", ""), 1.0);
    }

    #[test]
    fn direction_mismatch_detects_over_under() {
        assert!(detect_direction_mismatch(
            "Over 45.5 points in the game",
            "Under 45.5 points in the game"
        ));
    }

    #[test]
    fn direction_mismatch_false_for_aligned_titles() {
        assert!(!detect_direction_mismatch(
            "Bitcoin to reach $100k by 2025",
            "Bitcoin hits $100k in 2025"
        ));
    }

    #[test]
    fn infer_polarity_detects_negation() {
        use crate::core::contract::Polarity;
        assert_eq!(infer_polarity("fed won't hike rates"), Polarity::Negative);
        assert_eq!(infer_polarity("fed hikes rates in march"), Polarity::Positive);
    }
}
