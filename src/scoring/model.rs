//! Frozen regression and classification models.
//!
//! Both come in a linear form and a tree-ensemble form. Trees send a row
//! left when `row[feature] <= threshold`; ensembles average their trees.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionTree {
    /// Node 0 is the root.
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn predict(&self, row: &[f64]) -> Option<f64> {
        let mut idx = 0;
        // A well-formed tree reaches a leaf in at most `nodes.len()` hops.
        for _ in 0..=self.nodes.len() {
            match self.nodes.get(idx)? {
                TreeNode::Leaf { value } => return Some(*value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if *row.get(*feature)? <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
        None
    }

    fn validate(&self, width: usize) -> std::result::Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".to_string());
        }
        for node in &self.nodes {
            if let TreeNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= width {
                    return Err(format!(
                        "split on feature {} but row width is {}",
                        feature, width
                    ));
                }
                if *left >= self.nodes.len() || *right >= self.nodes.len() {
                    return Err("split points outside the node table".to_string());
                }
            }
        }
        Ok(())
    }
}

fn ensemble_mean(trees: &[DecisionTree], row: &[f64]) -> Option<f64> {
    if trees.is_empty() {
        return None;
    }
    let mut total = 0.0;
    for tree in trees {
        total += tree.predict(row)?;
    }
    Some(total / trees.len() as f64)
}

fn validate_linear(coefficients: &[f64], width: usize) -> std::result::Result<(), String> {
    if coefficients.len() != width {
        return Err(format!(
            "model expects {} features but the row has {}",
            coefficients.len(),
            width
        ));
    }
    Ok(())
}

fn dot(coefficients: &[f64], row: &[f64]) -> f64 {
    coefficients.iter().zip(row).map(|(c, x)| c * x).sum()
}

/// Interest-rate model. Predicts in percentage points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Regressor {
    Linear {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    TreeEnsemble {
        trees: Vec<DecisionTree>,
    },
}

impl Regressor {
    pub fn validate(&self, width: usize) -> std::result::Result<(), String> {
        match self {
            Regressor::Linear { coefficients, .. } => validate_linear(coefficients, width),
            Regressor::TreeEnsemble { trees } => {
                if trees.is_empty() {
                    return Err("ensemble has no trees".to_string());
                }
                trees.iter().try_for_each(|t| t.validate(width))
            }
        }
    }

    pub fn predict(&self, row: &[f64]) -> Option<f64> {
        match self {
            Regressor::Linear {
                intercept,
                coefficients,
            } => Some(intercept + dot(coefficients, row)),
            Regressor::TreeEnsemble { trees } => ensemble_mean(trees, row),
        }
    }
}

/// Default-probability model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Logistic {
        intercept: f64,
        coefficients: Vec<f64>,
    },
    /// Leaves hold positive-class probabilities.
    TreeEnsemble {
        trees: Vec<DecisionTree>,
    },
}

impl Classifier {
    pub fn validate(&self, width: usize) -> std::result::Result<(), String> {
        match self {
            Classifier::Logistic { coefficients, .. } => validate_linear(coefficients, width),
            Classifier::TreeEnsemble { trees } => {
                if trees.is_empty() {
                    return Err("ensemble has no trees".to_string());
                }
                trees.iter().try_for_each(|t| t.validate(width))
            }
        }
    }

    pub fn predict_proba(&self, row: &[f64]) -> Option<f64> {
        let p = match self {
            Classifier::Logistic {
                intercept,
                coefficients,
            } => sigmoid(intercept + dot(coefficients, row)),
            Classifier::TreeEnsemble { trees } => ensemble_mean(trees, row)?,
        };
        Some(p.clamp(0.0, 1.0))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}
