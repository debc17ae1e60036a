//! Locating and restoring parameter checkpoints stored as `.safetensors`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};
use safetensors::{Dtype, SafeTensors};

use crate::error::{EvalError, Result};

/// Name of the optional pointer file naming the checkpoint to restore.
pub const POINTER_FILE: &str = "checkpoint";

/// Resolves the checkpoint to restore from `dir`.
///
/// A `checkpoint` pointer file (`model_checkpoint_path: "<file>"`) wins;
/// otherwise the `.safetensors` file with the highest trailing step number.
pub fn latest_checkpoint(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(EvalError::ModelLoad(format!(
            "checkpoint directory not found at: {}",
            dir.display()
        )));
    }

    let pointer = dir.join(POINTER_FILE);
    if pointer.is_file() {
        let contents = fs::read_to_string(&pointer)?;
        if let Some(name) = parse_pointer(&contents) {
            let path = dir.join(name);
            if path.is_file() {
                return Ok(path);
            }
            return Err(EvalError::ModelLoad(format!(
                "{} points at missing checkpoint {}",
                pointer.display(),
                path.display()
            )));
        }
    }

    let mut candidates: Vec<(u64, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("safetensors") {
            continue;
        }
        let step = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(trailing_step)
            .unwrap_or(0);
        candidates.push((step, path));
    }
    candidates.sort();

    candidates.pop().map(|(_, path)| path).ok_or_else(|| {
        EvalError::ModelLoad(format!(
            "no restorable checkpoint in {}",
            dir.display()
        ))
    })
}

fn parse_pointer(contents: &str) -> Option<&str> {
    contents.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("model_checkpoint_path:")?;
        Some(rest.trim().trim_matches('"'))
    })
}

fn trailing_step(stem: &str) -> Option<u64> {
    let digits: String = stem
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().ok()
}

/// Restored parameters, keyed by tensor name.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    tensors: HashMap<String, ArrayD<f32>>,
}

impl Checkpoint {
    pub fn restore(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let safetensors = SafeTensors::deserialize(&bytes)?;

        let mut tensors = HashMap::new();
        for (name, view) in safetensors.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(EvalError::ModelLoad(format!(
                    "Unsupported dtype {:?} for tensor '{}'. Only F32 is supported.",
                    view.dtype(),
                    name
                )));
            }
            let data: Vec<f32> = view
                .data()
                .chunks_exact(std::mem::size_of::<f32>())
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data).map_err(|e| {
                EvalError::ModelLoad(format!("Failed to create tensor '{}': {}", name, e))
            })?;
            tensors.insert(name, array);
        }

        log::info!(
            "Restored {} tensors from {}",
            tensors.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            tensors,
        })
    }

    /// Restores the latest checkpoint found in `dir`.
    pub fn restore_latest(dir: &Path) -> Result<Self> {
        Self::restore(&latest_checkpoint(dir)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    fn get(&self, name: &str, shape: &[usize]) -> Result<ArrayD<f32>> {
        let tensor = self.tensors.get(name).ok_or_else(|| {
            EvalError::ModelLoad(format!(
                "tensor '{}' missing from {}",
                name,
                self.path.display()
            ))
        })?;
        if tensor.shape() != shape {
            return Err(EvalError::ModelLoad(format!(
                "tensor '{}' has shape {:?}, expected {:?}",
                name,
                tensor.shape(),
                shape
            )));
        }
        Ok(tensor.clone())
    }

    pub fn vector(&self, name: &str, len: usize) -> Result<Array1<f32>> {
        self.get(name, &[len])?
            .into_dimensionality::<Ix1>()
            .map_err(|e| EvalError::ModelLoad(e.to_string()))
    }

    pub fn matrix(&self, name: &str, rows: usize, cols: usize) -> Result<Array2<f32>> {
        self.get(name, &[rows, cols])?
            .into_dimensionality::<Ix2>()
            .map_err(|e| EvalError::ModelLoad(e.to_string()))
    }

    pub fn tensor(&self, name: &str, shape: &[usize]) -> Result<ArrayD<f32>> {
        self.get(name, shape)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use safetensors::tensor::TensorView;
    use tempfile::tempdir;

    pub(crate) fn write_safetensors(path: &Path, tensors: &[(String, Vec<usize>, Vec<f32>)]) {
        let bytes: Vec<Vec<u8>> = tensors
            .iter()
            .map(|(_, _, data)| data.iter().flat_map(|v| v.to_le_bytes()).collect())
            .collect();
        let views: Vec<(String, TensorView)> = tensors
            .iter()
            .zip(&bytes)
            .map(|((name, shape, _), raw)| {
                (name.clone(), TensorView::new(Dtype::F32, shape.clone(), raw).unwrap())
            })
            .collect();
        safetensors::serialize_to_file(views, &None, path).unwrap();
    }

    #[test]
    fn test_empty_dir_has_no_checkpoint() {
        let dir = tempdir().unwrap();
        assert!(matches!(latest_checkpoint(dir.path()), Err(EvalError::ModelLoad(_))));
        assert!(matches!(
            Checkpoint::restore_latest(&dir.path().join("missing")),
            Err(EvalError::ModelLoad(_))
        ));
    }

    #[test]
    fn test_highest_step_wins() {
        let dir = tempdir().unwrap();
        let names = [
            "model-900.safetensors",
            "model-1200.safetensors",
            "model-30.safetensors",
            "notes.txt",
        ];
        for name in names {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let latest = latest_checkpoint(dir.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "model-1200.safetensors");
    }

    #[test]
    fn test_pointer_file_wins() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model-1.safetensors"), b"").unwrap();
        fs::write(dir.path().join("model-2.safetensors"), b"").unwrap();
        fs::write(
            dir.path().join(POINTER_FILE),
            "model_checkpoint_path: \"model-1.safetensors\"\n",
        )
        .unwrap();
        let latest = latest_checkpoint(dir.path()).unwrap();
        assert_eq!(latest.file_name().unwrap(), "model-1.safetensors");
    }

    #[test]
    fn test_restore_checks_names_and_shapes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model-5.safetensors");
        write_safetensors(
            &path,
            &[
                ("a".to_string(), vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]),
                ("b".to_string(), vec![3], vec![5.0, 6.0, 7.0]),
            ],
        );

        let checkpoint = Checkpoint::restore_latest(dir.path()).unwrap();
        assert_eq!(checkpoint.path(), path.as_path());
        assert!(checkpoint.contains("a"));
        assert_eq!(checkpoint.matrix("a", 2, 2).unwrap()[[1, 0]], 3.0);
        assert_eq!(checkpoint.vector("b", 3).unwrap().to_vec(), vec![5.0, 6.0, 7.0]);
        assert!(matches!(checkpoint.vector("b", 4), Err(EvalError::ModelLoad(_))));
        assert!(matches!(checkpoint.vector("c", 3), Err(EvalError::ModelLoad(_))));
    }

    #[test]
    fn test_garbage_file_is_model_load_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("model.safetensors"), b"not a checkpoint").unwrap();
        assert!(matches!(
            Checkpoint::restore_latest(dir.path()),
            Err(EvalError::ModelLoad(_))
        ));
    }
}
