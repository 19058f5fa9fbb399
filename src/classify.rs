use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::Error;

/// Width of the shape feature matrix fed to the classifier: 12 descriptors,
/// flattened to 22 numbers (the inertia tensor eigenvalues contribute 3, the
/// full tensor 9).
pub const FEATURE_LEN: usize = 22;

/// Verdict on one nucleus candidate's shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegClass {
    WellSegmented = 0,
    OverSegmented = 1,
    /// Recognized by the model but unused by the repair logic.
    UnderSegmented = 2,
}

/// Batch shape classification. The concrete model is injected so the
/// resolver can run against a stub in tests.
pub trait Classify {
    fn classify(&self, features: ArrayView2<f64>) -> Result<Vec<SegClass>, Error>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf(SegClass),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: ndarray::ArrayView1<f64>) -> SegClass {
        let mut i = 0;
        loop {
            match &self.nodes[i] {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // comparisons against NaN or +inf solidity are false:
                    // degenerate shapes always fall right
                    i = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                Node::Leaf(class) => return *class,
            }
        }
    }
}

/// Pretrained decision forest over nucleus shape features, deserialized once
/// at startup. Prediction is a majority vote over trees; ties break toward
/// the lowest class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionForest {
    trees: Vec<Tree>,
}

impl DecisionForest {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file =
            File::open(path).map_err(|err| Error::ClassifierUnavailable(err.to_string()))?;
        let forest: DecisionForest = bincode::deserialize_from(BufReader::new(file))
            .map_err(|err| Error::MalformedModel(err.to_string()))?;
        forest.validate()?;
        Ok(forest)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.trees.is_empty() {
            return Err(Error::MalformedModel("forest has no trees".to_string()));
        }
        for tree in &self.trees {
            if tree.nodes.is_empty() {
                return Err(Error::MalformedModel("tree has no nodes".to_string()));
            }
            for node in &tree.nodes {
                if let Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= FEATURE_LEN {
                        return Err(Error::MalformedFeatures {
                            expected: FEATURE_LEN,
                            got: *feature + 1,
                        });
                    }
                    if *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        return Err(Error::MalformedModel(
                            "split child index out of range".to_string(),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Classify for DecisionForest {
    fn classify(&self, features: ArrayView2<f64>) -> Result<Vec<SegClass>, Error> {
        if features.ncols() != FEATURE_LEN {
            return Err(Error::MalformedFeatures {
                expected: FEATURE_LEN,
                got: features.ncols(),
            });
        }

        let mut preds = Vec::with_capacity(features.nrows());
        for row in features.rows() {
            let mut votes = [0u32; 3];
            for tree in &self.trees {
                votes[tree.predict(row) as usize] += 1;
            }
            let best = match (votes[0] >= votes[1], votes[0] >= votes[2], votes[1] >= votes[2]) {
                (true, true, _) => SegClass::WellSegmented,
                (false, _, true) => SegClass::OverSegmented,
                _ => SegClass::UnderSegmented,
            };
            preds.push(best);
        }
        Ok(preds)
    }
}
