use std::collections::BTreeMap;

const STOPWORDS: [&str; 27] = [
    "the", "and", "is", "in", "at", "of", "a", "an", "to", "for", "on", "with", "this", "that",
    "it", "by", "from", "as", "are", "be", "or", "we", "you", "your", "our", "will", "can",
];

const MIN_TOKEN_CHARS: usize = 3;

fn is_separator_punctuation(ch: char) -> bool {
    matches!(
        ch,
        '\u{2018}'
            | '\u{2019}'
            | '\u{201C}'
            | '\u{201D}'
            | '\''
            | '"'
            | '.'
            | ','
            | '!'
            | '?'
            | ';'
            | ':'
            | '('
            | ')'
            | '/'
            | '-'
    )
}

/// Lowercase `value`, turn quotes and punctuation into spaces, and collapse whitespace.
#[must_use]
pub fn normalize_text(value: &str) -> String {
    let spaced = value
        .to_lowercase()
        .chars()
        .map(|ch| if is_separator_punctuation(ch) { ' ' } else { ch })
        .collect::<String>();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split normalized text into terms, dropping stopwords and tokens shorter than three characters.
#[must_use]
pub fn tokenize(value: &str) -> Vec<String> {
    let normalized = normalize_text(value);
    normalized
        .split(' ')
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !STOPWORDS.contains(token))
        .map(str::to_string)
        .collect()
}

/// Sparse term counts for one document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermVector {
    counts: BTreeMap<String, u32>,
}

impl TermVector {
    #[must_use]
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut counts = BTreeMap::new();
        for token in tokens {
            *counts.entry(token.into()).or_insert(0_u32) += 1;
        }
        Self { counts }
    }

    #[must_use]
    pub fn from_text(value: &str) -> Self {
        Self::from_tokens(tokenize(value))
    }

    #[must_use]
    pub fn count(&self, term: &str) -> u32 {
        self.counts.get(term).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.counts.iter().map(|(term, count)| (term.as_str(), *count))
    }

    fn squared_norm(&self) -> u64 {
        self.counts.values().map(|count| u64::from(*count) * u64::from(*count)).sum()
    }
}

/// Cosine similarity between two term vectors; 0 when either side is empty.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cosine_similarity(lhs: &TermVector, rhs: &TermVector) -> f64 {
    let lhs_norm = lhs.squared_norm();
    let rhs_norm = rhs.squared_norm();
    if lhs_norm == 0 || rhs_norm == 0 {
        return 0.0;
    }

    let dot: u64 = lhs
        .counts
        .iter()
        .filter_map(|(term, count)| {
            rhs.counts.get(term).map(|other| u64::from(*count) * u64::from(*other))
        })
        .sum();

    // sqrt(a * b) keeps sim(A, A) exactly 1.0 for integer counts.
    dot as f64 / (lhs_norm as f64 * rhs_norm as f64).sqrt()
}
