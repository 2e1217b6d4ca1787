//! Bigram (Dice coefficient) string similarity used to suggest task names

use std::collections::HashMap;

/// Minimum rating for a candidate to be suggested
pub const SUGGESTION_THRESHOLD: f64 = 0.12;

/// Maximum number of suggestions offered
pub const MAX_SUGGESTIONS: usize = 5;

/// A candidate and how similar it is to the input
#[derive(Debug, Clone, PartialEq)]
pub struct Rating {
    pub target: String,
    pub rating: f64,
}

/// Similarity of two strings between 0 (nothing shared) and 1 (identical),
/// ignoring whitespace
pub fn compare(first: &str, second: &str) -> f64 {
    let first: Vec<char> = first.chars().filter(|c| !c.is_whitespace()).collect();
    let second: Vec<char> = second.chars().filter(|c| !c.is_whitespace()).collect();

    if first == second {
        return 1.0;
    }
    if first.len() < 2 || second.len() < 2 {
        return 0.0;
    }

    let mut bigrams: HashMap<(char, char), usize> = HashMap::new();
    for pair in first.windows(2) {
        *bigrams.entry((pair[0], pair[1])).or_default() += 1;
    }

    let mut intersection = 0;
    for pair in second.windows(2) {
        if let Some(count) = bigrams.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    (2 * intersection) as f64 / (first.len() + second.len() - 2) as f64
}

/// Rate every target against `input`, in the targets' order
pub fn rate<'a, I>(input: &str, targets: I) -> Vec<Rating>
where
    I: IntoIterator<Item = &'a str>,
{
    targets
        .into_iter()
        .map(|target| Rating {
            target: target.to_string(),
            rating: compare(input, target),
        })
        .collect()
}

/// Best match among `targets`; the first one wins ties
pub fn best_match<'a, I>(input: &str, targets: I) -> Option<Rating>
where
    I: IntoIterator<Item = &'a str>,
{
    rate(input, targets).into_iter().fold(None, |best, current| match best {
        Some(best) if best.rating >= current.rating => Some(best),
        _ => Some(current),
    })
}

/// Candidates rated above [`SUGGESTION_THRESHOLD`], best first, at most
/// [`MAX_SUGGESTIONS`]
pub fn suggestions<'a, I>(input: &str, targets: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ratings: Vec<Rating> = rate(input, targets)
        .into_iter()
        .filter(|r| r.rating > SUGGESTION_THRESHOLD)
        .collect();
    ratings.sort_by(|a, b| b.rating.total_cmp(&a.rating));
    ratings
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|r| r.target)
        .collect()
}
