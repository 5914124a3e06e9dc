//! Pretrained model source: versioned JSON weight states.
//!
//! A state file carries the full topology plus named, shaped, flattened
//! f32 parameters. Loading validates the version, the parameter roster,
//! and every shape before assembling a network, so a truncated or
//! mismatched file fails fast instead of producing a silently wrong
//! model.

use crate::model::{ConvNet, NetConfig};
use crate::{AfinarError, Result};
use ndarray::{Array1, Array2, Array4};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Version tag written into every state file.
pub const STATE_VERSION: u32 = 1;

/// Parameter roster of a [`ConvNet`], in serialization order.
pub const PARAM_NAMES: [&str; 6] =
    ["conv1.weight", "conv1.bias", "conv2.weight", "conv2.bias", "head.weight", "head.bias"];

/// Shape and placement of one named parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamInfo {
    /// Parameter name, e.g. `conv1.weight`.
    pub name: String,
    /// Tensor shape.
    pub shape: Vec<usize>,
}

/// Serializable network state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetState {
    /// Format version; see [`STATE_VERSION`].
    pub version: u32,
    /// Human-readable model name.
    pub name: String,
    /// Input channel count.
    pub in_channels: usize,
    /// Input resolution as `(height, width)`.
    pub input_hw: (usize, usize),
    /// Conv block widths.
    pub conv_channels: [usize; 2],
    /// Head width the state was saved with.
    pub num_classes: usize,
    /// Parameter roster, in data order.
    pub parameters: Vec<ParamInfo>,
    /// Flattened parameter data, concatenated in roster order.
    pub data: Vec<f32>,
}

/// Snapshot a network into a serializable state.
#[must_use]
pub fn net_to_state(net: &ConvNet, name: impl Into<String>) -> NetState {
    let cfg = net.config();
    let mut parameters = Vec::with_capacity(PARAM_NAMES.len());
    let mut data = Vec::new();
    for (name, shape, values) in net.param_tensors() {
        parameters.push(ParamInfo { name: name.to_string(), shape });
        data.extend_from_slice(&values);
    }
    NetState {
        version: STATE_VERSION,
        name: name.into(),
        in_channels: cfg.in_channels,
        input_hw: cfg.input_hw,
        conv_channels: cfg.conv_channels,
        num_classes: cfg.num_classes,
        parameters,
        data,
    }
}

/// Assemble a network from a state.
///
/// `init_seed` seeds any later head replacement; the state itself
/// carries no randomness.
///
/// # Errors
///
/// Returns `Serialization` on version or roster mismatches and
/// `ShapeMismatch` when a parameter's shape disagrees with the
/// topology fields.
pub fn net_from_state(state: &NetState, init_seed: u64) -> Result<ConvNet> {
    if state.version != STATE_VERSION {
        return Err(AfinarError::Serialization {
            message: format!(
                "unsupported model state version {} (expected {STATE_VERSION})",
                state.version
            ),
        });
    }

    let mut params: BTreeMap<&str, (&[usize], &[f32])> = BTreeMap::new();
    let mut offset = 0usize;
    for info in &state.parameters {
        // checked arithmetic so a hostile shape cannot wrap the bounds check
        let len = info
            .shape
            .iter()
            .try_fold(1usize, |n, &d| n.checked_mul(d))
            .ok_or_else(|| AfinarError::Serialization {
                message: format!(
                    "parameter '{}' has an overflowing shape {:?}",
                    info.name, info.shape
                ),
            })?;
        let end = offset.checked_add(len).filter(|&end| end <= state.data.len()).ok_or_else(
            || AfinarError::Serialization {
                message: format!(
                    "parameter '{}' needs {len} values at offset {offset}, data holds {}",
                    info.name,
                    state.data.len()
                ),
            },
        )?;
        if params.insert(info.name.as_str(), (&info.shape, &state.data[offset..end])).is_some() {
            return Err(AfinarError::Serialization {
                message: format!("duplicate parameter '{}'", info.name),
            });
        }
        offset = end;
    }
    if offset != state.data.len() {
        return Err(AfinarError::Serialization {
            message: format!(
                "data holds {} values but the roster accounts for {offset}",
                state.data.len()
            ),
        });
    }
    for name in PARAM_NAMES {
        if !params.contains_key(name) {
            return Err(AfinarError::Serialization {
                message: format!("missing parameter '{name}'"),
            });
        }
    }
    if params.len() != PARAM_NAMES.len() {
        let extra: Vec<&str> = params
            .keys()
            .copied()
            .filter(|k| !PARAM_NAMES.contains(k))
            .collect();
        return Err(AfinarError::Serialization {
            message: format!("unexpected parameters: {}", extra.join(", ")),
        });
    }

    let config = NetConfig {
        in_channels: state.in_channels,
        input_hw: state.input_hw,
        conv_channels: state.conv_channels,
        num_classes: state.num_classes,
        init_seed,
    };

    ConvNet::assemble(
        config,
        take4(&params, "conv1.weight")?,
        take1(&params, "conv1.bias")?,
        take4(&params, "conv2.weight")?,
        take1(&params, "conv2.bias")?,
        take2(&params, "head.weight")?,
        take1(&params, "head.bias")?,
    )
}

/// Write a state as pretty JSON.
///
/// # Errors
///
/// Returns `Serialization` when encoding fails and a contextual `Io`
/// error when the write fails.
pub fn save_state(state: &NetState, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(state)
        .map_err(|e| AfinarError::Serialization { message: format!("model state encoding failed: {e}") })?;
    std::fs::write(path, json)
        .map_err(|e| AfinarError::io(format!("writing model state to {}", path.display()), e))
}

/// Read a state file.
///
/// # Errors
///
/// Returns `WeightsNotFound` when the file is missing and
/// `Serialization` when it is not a valid state document.
pub fn load_state(path: impl AsRef<Path>) -> Result<NetState> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AfinarError::WeightsNotFound { path: path.to_path_buf() }
        } else {
            AfinarError::io(format!("reading model state from {}", path.display()), e)
        }
    })?;
    serde_json::from_str(&content).map_err(|e| AfinarError::Serialization {
        message: format!("model state in {} is invalid: {e}", path.display()),
    })
}

/// Load a pretrained network from a state file.
pub fn load_pretrained(path: impl AsRef<Path>, init_seed: u64) -> Result<ConvNet> {
    let state = load_state(path)?;
    net_from_state(&state, init_seed)
}

type ParamMap<'a> = BTreeMap<&'a str, (&'a [usize], &'a [f32])>;

fn take1(params: &ParamMap<'_>, name: &str) -> Result<Array1<f32>> {
    let (shape, data) = params[name];
    if shape.len() != 1 {
        return Err(shape_err(name, shape, 1));
    }
    Ok(Array1::from_vec(data.to_vec()))
}

fn take2(params: &ParamMap<'_>, name: &str) -> Result<Array2<f32>> {
    let (shape, data) = params[name];
    if shape.len() != 2 {
        return Err(shape_err(name, shape, 2));
    }
    Array2::from_shape_vec((shape[0], shape[1]), data.to_vec())
        .map_err(|_| shape_err(name, shape, 2))
}

fn take4(params: &ParamMap<'_>, name: &str) -> Result<Array4<f32>> {
    let (shape, data) = params[name];
    if shape.len() != 4 {
        return Err(shape_err(name, shape, 4));
    }
    Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), data.to_vec())
        .map_err(|_| shape_err(name, shape, 4))
}

fn shape_err(name: &str, shape: &[usize], rank: usize) -> AfinarError {
    AfinarError::Serialization {
        message: format!("parameter '{name}' has shape {shape:?}, expected rank {rank}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn small_net() -> ConvNet {
        let config = NetConfig {
            in_channels: 1,
            input_hw: (8, 8),
            conv_channels: [2, 3],
            num_classes: 4,
            init_seed: 3,
        };
        ConvNet::seeded(config).expect("valid config")
    }

    #[test]
    fn test_state_round_trip_preserves_behavior() {
        let original = small_net();
        let state = net_to_state(&original, "unit");
        let restored = net_from_state(&state, 3).expect("valid state");

        let x = Array4::from_shape_fn((2, 1, 8, 8), |(_, _, y, xx)| (y * 8 + xx) as f32 / 64.0);
        assert_eq!(
            original.forward(&x).expect("forward"),
            restored.forward(&x).expect("forward")
        );
        assert_eq!(original.config(), restored.config());
    }

    #[test]
    fn test_state_lists_full_roster_in_order() {
        let state = net_to_state(&small_net(), "unit");
        let names: Vec<&str> = state.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, PARAM_NAMES);
        let total: usize =
            state.parameters.iter().map(|p| p.shape.iter().product::<usize>()).sum();
        assert_eq!(total, state.data.len());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        state.version = 99;
        let err = net_from_state(&state, 0).err().expect("version must fail");
        assert!(err.to_string().contains("version 99"));
    }

    #[test]
    fn test_missing_parameter_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        let dropped = state.parameters.pop().expect("roster is non-empty");
        let len: usize = dropped.shape.iter().product();
        state.data.truncate(state.data.len() - len);

        let err = net_from_state(&state, 0).err().expect("missing param must fail");
        assert!(err.to_string().contains("head.bias"));
    }

    #[test]
    fn test_short_data_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        state.data.pop();
        assert!(net_from_state(&state, 0).is_err());
    }

    #[test]
    fn test_trailing_data_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        state.data.push(0.0);
        let err = net_from_state(&state, 0).err().expect("trailing data must fail");
        assert!(err.to_string().contains("roster accounts for"));
    }

    #[test]
    fn test_overflowing_shape_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        // The claimed element count exceeds usize.
        state.parameters[0].shape = vec![usize::MAX, 2];
        let err = net_from_state(&state, 0).err().expect("overflowing shape must fail");
        assert!(matches!(err, AfinarError::Serialization { .. }));
        assert!(err.to_string().contains("conv1.weight"));
    }

    #[test]
    fn test_oversized_parameter_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        // A representable length that no data buffer can back.
        state.parameters[1].shape = vec![usize::MAX];
        let err = net_from_state(&state, 0).err().expect("oversized parameter must fail");
        assert!(matches!(err, AfinarError::Serialization { .. }));
        assert!(err.to_string().contains("conv1.bias"));
    }

    #[test]
    fn test_shape_disagreement_rejected() {
        let mut state = net_to_state(&small_net(), "unit");
        // Claim a different head width than the topology fields.
        state.num_classes = 7;
        assert!(matches!(
            net_from_state(&state, 0),
            Err(AfinarError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("weights.json");

        let original = small_net();
        save_state(&net_to_state(&original, "disk"), &path).expect("save state");
        let restored = load_pretrained(&path, 3).expect("load state");

        let (w, b) = original.head_weights();
        let (rw, rb) = restored.head_weights();
        assert_eq!(w, rw);
        assert_eq!(b, rb);
    }

    #[test]
    fn test_missing_weights_file() {
        let result = load_pretrained("no/such/weights.json", 0);
        assert!(matches!(result, Err(AfinarError::WeightsNotFound { .. })));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("weights.json");
        std::fs::write(&path, "{ not json").expect("write garbage");

        let err = load_state(&path).err().expect("garbage must fail");
        assert!(matches!(err, AfinarError::Serialization { .. }));
    }
}
