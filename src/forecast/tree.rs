//! CART regression tree.
//!
//! Array-based representation: nodes live in one `Vec` and refer to their
//! children by index, root at 0. Splits minimise the summed squared error of
//! the two children (variance reduction). Every feature is considered at
//! every node.

// ---

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 10,
            min_samples_split: 5,
            min_samples_leaf: 2,
        }
    }
}

/// A node in the tree.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeNode {
    /// Terminal node predicting the mean target of its samples.
    Leaf { value: f64 },
    /// Features `<= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted regression tree.
#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
    /// Unnormalised impurity decrease per feature.
    importances: Vec<f64>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    left_sse: f64,
    right_sse: f64,
}

impl RegressionTree {
    // ---
    /// Fit on the rows of `x` selected by `samples` (duplicates allowed, as
    /// produced by bootstrap sampling).
    pub fn fit(x: &[Vec<f64>], y: &[f64], samples: &[usize], params: TreeParams) -> Self {
        // ---
        let n_features = x.first().map_or(0, Vec::len);
        let mut tree = RegressionTree {
            nodes: Vec::new(),
            n_features,
            importances: vec![0.0; n_features],
        };
        if samples.is_empty() {
            tree.nodes.push(TreeNode::Leaf { value: 0.0 });
            return tree;
        }
        tree.grow(x, y, samples.to_vec(), 0, params);
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        samples: Vec<usize>,
        depth: usize,
        params: TreeParams,
    ) -> usize {
        // ---
        let idx = self.nodes.len();
        let (mean, sse) = mean_and_sse(y, &samples);
        self.nodes.push(TreeNode::Leaf { value: mean });

        if depth >= params.max_depth
            || samples.len() < params.min_samples_split
            || sse <= f64::EPSILON
        {
            return idx;
        }

        let Some(split) = self.best_split(x, y, &samples, params.min_samples_leaf.max(1)) else {
            return idx;
        };

        let (left_samples, right_samples): (Vec<usize>, Vec<usize>) = samples
            .iter()
            .partition(|&&s| x[s][split.feature] <= split.threshold);

        self.importances[split.feature] += (sse - split.left_sse - split.right_sse).max(0.0);

        let left = self.grow(x, y, left_samples, depth + 1, params);
        let right = self.grow(x, y, right_samples, depth + 1, params);
        self.nodes[idx] = TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        idx
    }

    fn best_split(
        &self,
        x: &[Vec<f64>],
        y: &[f64],
        samples: &[usize],
        min_leaf: usize,
    ) -> Option<BestSplit> {
        // ---
        let n = samples.len();
        if n < 2 * min_leaf {
            return None;
        }

        let total_sum: f64 = samples.iter().map(|&s| y[s]).sum();
        let total_sq: f64 = samples.iter().map(|&s| y[s] * y[s]).sum();

        let mut best: Option<BestSplit> = None;
        let mut best_score = f64::INFINITY;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for feature in 0..self.n_features {
            pairs.clear();
            pairs.extend(samples.iter().map(|&s| (x[s][feature], y[s])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 1..n {
                let (_, yv) = pairs[i - 1];
                left_sum += yv;
                left_sq += yv * yv;

                if i < min_leaf || n - i < min_leaf || pairs[i - 1].0 >= pairs[i].0 {
                    continue;
                }

                let n_left = i as f64;
                let n_right = (n - i) as f64;
                let right_sum = total_sum - left_sum;
                let right_sq = total_sq - left_sq;
                let left_sse = (left_sq - left_sum * left_sum / n_left).max(0.0);
                let right_sse = (right_sq - right_sum * right_sum / n_right).max(0.0);
                let score = left_sse + right_sse;

                if score < best_score {
                    let lo = pairs[i - 1].0;
                    let hi = pairs[i].0;
                    let mid = lo + (hi - lo) / 2.0;
                    best_score = score;
                    best = Some(BestSplit {
                        feature,
                        threshold: if mid < hi { mid } else { lo },
                        left_sse,
                        right_sse,
                    });
                }
            }
        }
        best
    }

    /// Predict one sample by walking from the root to a leaf.
    pub fn predict(&self, features: &[f64]) -> f64 {
        // ---
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let v = features.get(*feature).copied().unwrap_or(0.0);
                    idx = if v <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    pub const fn n_features(&self) -> usize {
        self.n_features
    }

    /// Impurity decrease per feature, normalised to sum to 1 (all zero for a
    /// single-leaf tree).
    pub fn feature_importances(&self) -> Vec<f64> {
        // ---
        let total: f64 = self.importances.iter().sum();
        if total <= 0.0 {
            return vec![0.0; self.n_features];
        }
        self.importances.iter().map(|v| v / total).collect()
    }

    /// Longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        self.node_depth(0)
    }

    fn node_depth(&self, idx: usize) -> usize {
        match &self.nodes[idx] {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => {
                1 + self.node_depth(*left).max(self.node_depth(*right))
            }
        }
    }
}

fn mean_and_sse(y: &[f64], samples: &[usize]) -> (f64, f64) {
    // ---
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&s| y[s]).sum::<f64>() / n;
    let sse = samples.iter().map(|&s| (y[s] - mean).powi(2)).sum();
    (mean, sse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // y jumps from 10 to 50 when f[0] crosses 5; f[1] is noise
        let x: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![i as f64 * 0.5, ((i * 7) % 5) as f64])
            .collect();
        let y = x
            .iter()
            .map(|r| if r[0] <= 5.0 { 10.0 } else { 50.0 })
            .collect();
        (x, y)
    }

    #[test]
    fn learns_a_step() {
        let (x, y) = step_data();
        let samples: Vec<usize> = (0..x.len()).collect();
        let tree = RegressionTree::fit(&x, &y, &samples, TreeParams::default());

        assert_eq!(tree.predict(&[1.0, 0.0]), 10.0);
        assert_eq!(tree.predict(&[9.0, 0.0]), 50.0);
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.n_leaves(), 2);

        let importances = tree.feature_importances();
        assert!((importances[0] - 1.0).abs() < 1e-12);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn respects_max_depth() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let samples: Vec<usize> = (0..64).collect();
        let params = TreeParams {
            max_depth: 3,
            ..TreeParams::default()
        };
        let tree = RegressionTree::fit(&x, &y, &samples, params);
        assert!(tree.depth() <= 3);
        assert!(tree.n_leaves() <= 8);
    }

    #[test]
    fn respects_min_samples_leaf() {
        // A single outlier cannot be isolated into a leaf of one
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let mut y = vec![1.0; 10];
        y[9] = 100.0;
        let samples: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &y, &samples, TreeParams::default());
        assert!(tree.predict(&[9.0]) < 100.0);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![3.0; 10];
        let samples: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &y, &samples, TreeParams::default());
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(tree.predict(&[42.0]), 3.0);
        assert_eq!(tree.feature_importances(), vec![0.0]);
    }
}
