use std::collections::BTreeMap;

use ndarray::IxDyn;

use crate::{
    error::{CoordinatorError, Result},
    model::{GlobalModel, Tensor},
};

/// Reduces every contributor's parameters into a new global parameter set.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    layout: Vec<Vec<usize>>,
}

impl Aggregator {
    /// Creates an `Aggregator` expecting `layout`, one shape per tensor.
    pub fn new(layout: Vec<Vec<usize>>) -> Self {
        Self { layout }
    }

    pub fn for_model(model: &GlobalModel) -> Self {
        Self::new(model.layout())
    }

    /// Element wise unweighted mean of every contributor's tensor `i`.
    ///
    /// # Arguments
    /// * `updates` - Every contributor's parameters, keyed by worker id.
    ///
    /// # Returns
    /// One tensor per entry of the layout.
    ///
    /// # Errors
    /// `EmptyAggregation` without contributors, `TensorCountMismatch` or
    /// `ShapeMismatch` if a contributor doesn't match the layout.
    pub fn average(&self, updates: &BTreeMap<String, Vec<Tensor>>) -> Result<Vec<Tensor>> {
        if updates.is_empty() {
            return Err(CoordinatorError::EmptyAggregation);
        }

        for (worker_id, params) in updates {
            self.check_layout(worker_id, params)?;
        }

        let mut sums: Vec<Tensor> = self
            .layout
            .iter()
            .map(|shape| Tensor::zeros(IxDyn(shape)))
            .collect();

        for params in updates.values() {
            for (sum, param) in sums.iter_mut().zip(params) {
                *sum += param;
            }
        }

        let n = updates.len() as f32;
        for sum in &mut sums {
            *sum /= n;
        }

        Ok(sums)
    }

    fn check_layout(&self, worker_id: &str, params: &[Tensor]) -> Result<()> {
        if params.len() != self.layout.len() {
            return Err(CoordinatorError::TensorCountMismatch {
                worker_id: worker_id.to_string(),
                expected: self.layout.len(),
                got: params.len(),
            });
        }

        let mismatch = self
            .layout
            .iter()
            .zip(params)
            .enumerate()
            .find(|(_, (expected, param))| param.shape() != expected.as_slice());

        if let Some((index, (expected, param))) = mismatch {
            return Err(CoordinatorError::ShapeMismatch {
                worker_id: worker_id.to_string(),
                index,
                expected: expected.clone(),
                got: param.shape().to_vec(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use super::*;

    fn updates(entries: Vec<(&str, Vec<Tensor>)>) -> BTreeMap<String, Vec<Tensor>> {
        entries
            .into_iter()
            .map(|(id, params)| (id.to_string(), params))
            .collect()
    }

    #[test]
    fn three_scalars_average_to_their_mean() {
        let aggregator = Aggregator::new(vec![vec![1]]);
        let updates = updates(vec![
            ("alice", vec![arr1(&[1.0]).into_dyn()]),
            ("bob", vec![arr1(&[2.0]).into_dyn()]),
            ("carol", vec![arr1(&[3.0]).into_dyn()]),
        ]);

        assert_eq!(aggregator.average(&updates).unwrap(), [arr1(&[2.0]).into_dyn()]);
    }

    #[test]
    fn every_index_is_averaged_element_wise() {
        let model = GlobalModel::new(vec![
            arr2(&[[0.0, 0.0], [0.0, 0.0]]).into_dyn(),
            arr1(&[0.0, 0.0, 0.0]).into_dyn(),
        ]);
        let aggregator = Aggregator::for_model(&model);
        let updates = updates(vec![
            (
                "alice",
                vec![
                    arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn(),
                    arr1(&[0.0, 10.0, -4.0]).into_dyn(),
                ],
            ),
            (
                "bob",
                vec![
                    arr2(&[[3.0, 2.0], [1.0, 0.0]]).into_dyn(),
                    arr1(&[2.0, 20.0, 4.0]).into_dyn(),
                ],
            ),
        ]);

        let averaged = aggregator.average(&updates).unwrap();
        assert_eq!(averaged[0], arr2(&[[2.0, 2.0], [2.0, 2.0]]).into_dyn());
        assert_eq!(averaged[1], arr1(&[1.0, 15.0, 0.0]).into_dyn());
    }

    #[test]
    fn a_single_contributor_is_returned_unchanged() {
        let aggregator = Aggregator::new(vec![vec![2]]);
        let updates = updates(vec![("alice", vec![arr1(&[0.5, -1.5]).into_dyn()])]);

        assert_eq!(aggregator.average(&updates).unwrap(), [arr1(&[0.5, -1.5]).into_dyn()]);
    }

    #[test]
    fn no_contributors_is_an_error() {
        let aggregator = Aggregator::new(vec![vec![1]]);
        let err = aggregator.average(&BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoordinatorError::EmptyAggregation));
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let aggregator = Aggregator::new(vec![vec![2], vec![1]]);
        let updates = updates(vec![
            ("alice", vec![arr1(&[1.0, 2.0]).into_dyn(), arr1(&[1.0]).into_dyn()]),
            ("bob", vec![arr1(&[1.0, 2.0]).into_dyn(), arr1(&[1.0, 2.0]).into_dyn()]),
        ]);

        let err = aggregator.average(&updates).unwrap_err();
        let CoordinatorError::ShapeMismatch {
            worker_id,
            index,
            expected,
            got,
        } = err
        else {
            panic!("expected a shape mismatch, got {err:?}");
        };

        assert_eq!(worker_id, "bob");
        assert_eq!(index, 1);
        assert_eq!(expected, [1]);
        assert_eq!(got, [2]);
    }

    #[test]
    fn a_missing_tensor_is_rejected() {
        let aggregator = Aggregator::new(vec![vec![1], vec![1]]);
        let updates = updates(vec![("alice", vec![arr1(&[1.0]).into_dyn()])]);

        let err = aggregator.average(&updates).unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::TensorCountMismatch { expected: 2, got: 1, .. }
        ));
    }
}
