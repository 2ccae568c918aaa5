//! Frozen TF-IDF text encoder.
//!
//! Matches the trained vectorizer: lowercase, tokens of two or more word
//! characters, raw term counts times idf, L2-normalised row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TfidfVectorizer {
    /// term -> column
    pub vocabulary: HashMap<String, usize>,
    /// one weight per column
    pub idf: Vec<f64>,
}

impl TfidfVectorizer {
    pub fn width(&self) -> usize {
        self.idf.len()
    }

    /// Every vocabulary column must have an idf weight.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self.vocabulary.iter().find(|(_, col)| **col >= self.idf.len()) {
            Some((term, col)) => Err(format!(
                "term '{}' maps to column {} but only {} idf weights exist",
                term,
                col,
                self.idf.len()
            )),
            None => Ok(()),
        }
    }

    pub fn transform(&self, text: &str) -> Vec<f64> {
        let mut row = vec![0.0; self.width()];

        for token in tokenize(text) {
            if let Some(&col) = self.vocabulary.get(&token) {
                if let Some(cell) = row.get_mut(col) {
                    *cell += 1.0;
                }
            }
        }

        for (cell, idf) in row.iter_mut().zip(&self.idf) {
            *cell *= idf;
        }

        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for cell in row.iter_mut() {
                *cell /= norm;
            }
        }

        row
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|token| token.chars().count() >= 2)
        .map(str::to_lowercase)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectorizer() -> TfidfVectorizer {
        TfidfVectorizer {
            vocabulary: [("debt", 0), ("consolidation", 1), ("car", 2)]
                .into_iter()
                .map(|(t, c)| (t.to_string(), c))
                .collect(),
            idf: vec![1.0, 2.0, 1.5],
        }
    }

    #[test]
    fn test_transform_is_l2_normalised() {
        let row = vectorizer().transform("Debt consolidation");
        let norm = (1.0f64 + 4.0).sqrt();
        assert!((row[0] - 1.0 / norm).abs() < 1e-12);
        assert!((row[1] - 2.0 / norm).abs() < 1e-12);
        assert_eq!(row[2], 0.0);
    }

    #[test]
    fn test_unknown_and_short_tokens_are_ignored() {
        let row = vectorizer().transform("a x unknown");
        assert_eq!(row, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_repeated_terms_count() {
        let row = vectorizer().transform("car car debt");
        // counts 1 and 2, weighted 1.0 and 1.5
        let norm = (1.0f64 + 9.0).sqrt();
        assert!((row[2] - 3.0 / norm).abs() < 1e-12);
    }

    #[test]
    fn test_validate_rejects_out_of_range_column() {
        let mut v = vectorizer();
        v.idf.pop();
        assert!(v.validate().is_err());
    }
}
