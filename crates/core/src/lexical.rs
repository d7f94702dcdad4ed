//! Okapi BM25 over lower-cased word tokens.

use std::collections::HashMap;

const K1: f64 = 1.5;
const B: f64 = 0.75;
/// Floor for terms whose IDF would be negative, as a fraction of the mean IDF.
const EPSILON: f64 = 0.25;

/// Lower-cased runs of word characters (alphanumerics and `_`).
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Term-frequency ranking model over a fixed corpus. Document `i` of the
/// corpus is scored at position `i` of [`Bm25Index::scores`].
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    term_frequencies: Vec<HashMap<String, u32>>,
    lengths: Vec<usize>,
    average_length: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    pub fn build<S: AsRef<str>>(corpus: &[S]) -> Self {
        let mut term_frequencies = Vec::with_capacity(corpus.len());
        let mut lengths = Vec::with_capacity(corpus.len());
        let mut document_frequency = HashMap::<String, usize>::new();

        for document in corpus {
            let tokens = tokenize(document.as_ref());
            lengths.push(tokens.len());

            let mut frequencies = HashMap::<String, u32>::new();
            for token in tokens {
                *frequencies.entry(token).or_default() += 1;
            }
            for term in frequencies.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
            term_frequencies.push(frequencies);
        }

        let documents = corpus.len() as f64;
        let average_length = if lengths.is_empty() {
            0.0
        } else {
            lengths.iter().sum::<usize>() as f64 / documents
        };

        let mut idf = HashMap::with_capacity(document_frequency.len());
        let mut idf_sum = 0.0;
        let mut negative = Vec::new();
        for (term, frequency) in document_frequency {
            let frequency = frequency as f64;
            let value = ((documents - frequency + 0.5) / (frequency + 0.5)).ln();
            idf_sum += value;
            if value < 0.0 {
                negative.push(term.clone());
            }
            idf.insert(term, value);
        }

        if !idf.is_empty() {
            let floor = EPSILON * idf_sum / idf.len() as f64;
            for term in negative {
                idf.insert(term, floor);
            }
        }

        Self {
            term_frequencies,
            lengths,
            average_length,
            idf,
        }
    }

    pub fn len(&self) -> usize {
        self.term_frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.term_frequencies.is_empty()
    }

    /// Score of `query` against every document, in corpus order.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_terms = tokenize(query);
        self.term_frequencies
            .iter()
            .zip(&self.lengths)
            .map(|(frequencies, &length)| {
                let length_norm = if self.average_length > 0.0 {
                    1.0 - B + B * length as f64 / self.average_length
                } else {
                    1.0
                };
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = frequencies.get(term).copied().unwrap_or(0) as f64;
                        let idf = self.idf.get(term).copied().unwrap_or(0.0);
                        idf * (tf * (K1 + 1.0)) / (tf + K1 * length_norm)
                    })
                    .sum()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_lowercased_word_runs() {
        assert_eq!(
            tokenize("Perioada de GRAȚIE: 30 zile, art.5"),
            vec!["perioada", "de", "grație", "30", "zile", "art", "5"]
        );
    }

    #[test]
    fn matching_documents_score_higher() {
        let corpus = [
            "the grace period for premium payment is thirty days",
            "flood damage is excluded",
            "theft requires forced entry",
            "premium payment by bank transfer",
        ];
        let index = Bm25Index::build(&corpus);
        let scores = index.scores("grace period");

        assert_eq!(scores.len(), 4);
        assert!(scores[0] > 0.0);
        assert_eq!(scores[1], 0.0);
        assert!(scores[0] > scores[3]);
    }

    #[test]
    fn common_terms_get_the_epsilon_floor() {
        let corpus = [
            "cover applies",
            "cover excluded",
            "cover limited",
            "theft requires forced entry",
            "flood damage excluded",
        ];
        let index = Bm25Index::build(&corpus);
        let scores = index.scores("cover");
        assert!(scores[..3].iter().all(|score| *score > 0.0));
        assert_eq!(scores[3], 0.0);
    }

    #[test]
    fn empty_corpus_scores_nothing() {
        let index = Bm25Index::build::<&str>(&[]);
        assert!(index.is_empty());
        assert!(index.scores("anything").is_empty());
    }
}
