//! Loads and persists the global model as safetensors.
//!
//! Tensors are named `param_<index>` and stored as little endian `f32`.

use std::{collections::HashMap, fs, path::Path};

use ndarray::IxDyn;
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use crate::{
    error::{CoordinatorError, Result},
    model::{GlobalModel, Tensor},
};

const PARAM_PREFIX: &str = "param_";

/// Reads the global model stored at `path`.
///
/// # Errors
/// Returns `CoordinatorError::Checkpoint` if the file is unreadable, not
/// safetensors, holds no tensor, or holds anything other than `param_<i>`
/// `f32` tensors with contiguous indices.
pub fn load(path: &Path) -> Result<GlobalModel> {
    let bytes = fs::read(path)
        .map_err(|e| CoordinatorError::Checkpoint(format!("reading {}: {e}", path.display())))?;

    from_bytes(&bytes)
}

/// Writes `model` to `path`, replacing any previous checkpoint.
///
/// The file is written next to its destination first and renamed over it,
/// a reader never sees a partial checkpoint.
pub fn save(path: &Path, model: &GlobalModel) -> Result<()> {
    let bytes = to_bytes(model)?;
    let tmp = path.with_extension("partial");

    fs::write(&tmp, bytes)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|e| CoordinatorError::Checkpoint(format!("writing {}: {e}", path.display())))
}

pub fn to_bytes(model: &GlobalModel) -> Result<Vec<u8>> {
    let raw: Vec<(String, Vec<usize>, Vec<u8>)> = model
        .params()
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let bytes = param.iter().flat_map(|v| v.to_le_bytes()).collect();
            (format!("{PARAM_PREFIX}{i}"), param.shape().to_vec(), bytes)
        })
        .collect();

    let views = raw
        .iter()
        .map(|(name, shape, bytes)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| CoordinatorError::Checkpoint(format!("tensor {name}: {e:?}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata: Option<HashMap<String, String>> = None;
    safetensors::serialize(views, &metadata)
        .map_err(|e| CoordinatorError::Checkpoint(format!("serializing: {e:?}")))
}

pub fn from_bytes(bytes: &[u8]) -> Result<GlobalModel> {
    let tensors = SafeTensors::deserialize(bytes)
        .map_err(|e| CoordinatorError::Checkpoint(format!("parsing safetensors: {e:?}")))?;

    let mut indexed = tensors
        .tensors()
        .into_iter()
        .map(|(name, view)| Ok((param_index(&name)?, read_tensor(&name, &view)?)))
        .collect::<Result<Vec<_>>>()?;

    if indexed.is_empty() {
        return Err(CoordinatorError::Checkpoint(
            "the checkpoint holds no tensor".into(),
        ));
    }

    indexed.sort_by_key(|(i, _)| *i);

    if let Some((pos, (i, _))) = indexed.iter().enumerate().find(|(pos, (i, _))| pos != i) {
        return Err(CoordinatorError::Checkpoint(format!(
            "expected {PARAM_PREFIX}{pos}, found {PARAM_PREFIX}{i}"
        )));
    }

    Ok(GlobalModel::new(
        indexed.into_iter().map(|(_, t)| t).collect(),
    ))
}

fn param_index(name: &str) -> Result<usize> {
    name.strip_prefix(PARAM_PREFIX)
        .and_then(|i| i.parse().ok())
        .ok_or_else(|| {
            CoordinatorError::Checkpoint(format!(
                "unexpected tensor {name}, names must look like {PARAM_PREFIX}<index>"
            ))
        })
}

fn read_tensor(name: &str, view: &TensorView<'_>) -> Result<Tensor> {
    if view.dtype() != Dtype::F32 {
        return Err(CoordinatorError::Checkpoint(format!(
            "tensor {name} is {:?}, only F32 is supported",
            view.dtype()
        )));
    }

    let values = view
        .data()
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Tensor::from_shape_vec(IxDyn(view.shape()), values)
        .map_err(|e| CoordinatorError::Checkpoint(format!("tensor {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use ndarray::{ArrayD, arr1, arr2};

    use super::*;

    fn model() -> GlobalModel {
        GlobalModel::new(vec![
            arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn(),
            arr1(&[0.5, -0.5]).into_dyn(),
            ArrayD::from_elem(IxDyn(&[]), 7.0),
        ])
    }

    #[test]
    fn saved_model_loads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.safetensors");

        save(&path, &model()).unwrap();
        assert_eq!(load(&path).unwrap(), model());
    }

    #[test]
    fn more_than_ten_tensors_keep_numeric_order() {
        let params = (0..12).map(|i| arr1(&[i as f32]).into_dyn()).collect();
        let model = GlobalModel::new(params);

        let bytes = to_bytes(&model).unwrap();
        assert_eq!(from_bytes(&bytes).unwrap(), model);
    }

    #[test]
    fn foreign_tensor_names_are_rejected() {
        let data = 1.0f32.to_le_bytes();
        let view = TensorView::new(Dtype::F32, vec![1], &data).unwrap();
        let metadata: Option<HashMap<String, String>> = None;
        let bytes = safetensors::serialize(vec![("weight", view)], &metadata).unwrap();

        assert!(matches!(
            from_bytes(&bytes),
            Err(CoordinatorError::Checkpoint(_))
        ));
    }

    #[test]
    fn gaps_in_indices_are_rejected() {
        let data = 1.0f32.to_le_bytes();
        let views = vec![
            ("param_0", TensorView::new(Dtype::F32, vec![1], &data).unwrap()),
            ("param_2", TensorView::new(Dtype::F32, vec![1], &data).unwrap()),
        ];
        let metadata: Option<HashMap<String, String>> = None;
        let bytes = safetensors::serialize(views, &metadata).unwrap();

        let Err(CoordinatorError::Checkpoint(msg)) = from_bytes(&bytes) else {
            panic!("expected a checkpoint error");
        };
        assert!(msg.contains("param_1"));
    }

    #[test]
    fn missing_file_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = load(&dir.path().join("nope.safetensors"));
        assert!(matches!(res, Err(CoordinatorError::Checkpoint(_))));
    }
}
