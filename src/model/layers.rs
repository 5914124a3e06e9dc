//! Convolutional network building blocks.
//!
//! Plain `ndarray` forward routines over batched `N×C×H×W` tensors.
//! Only the classifier head is ever trained, so no backward passes live
//! here; the head gradient is closed-form in `train::loss`.

use ndarray::{Array1, Array2, Array4};

/// Output resolution of a convolution.
///
/// Assumes `h + 2*padding >= kernel` on both axes; `ConvNet` validates
/// its input resolution against this once at construction.
#[must_use]
pub fn conv_output_hw(
    input_hw: (usize, usize),
    kernel: (usize, usize),
    stride: (usize, usize),
    padding: (usize, usize),
) -> (usize, usize) {
    let (h, w) = input_hw;
    let oh = (h + 2 * padding.0 - kernel.0) / stride.0 + 1;
    let ow = (w + 2 * padding.1 - kernel.1) / stride.1 + 1;
    (oh, ow)
}

/// Output resolution of a pooling window (no padding).
#[must_use]
pub fn pool_output_hw(input_hw: (usize, usize), kernel: usize, stride: usize) -> (usize, usize) {
    let (h, w) = input_hw;
    ((h - kernel) / stride + 1, (w - kernel) / stride + 1)
}

/// 2D convolution with stride 1 and zero padding.
///
/// `weight` is `OC×IC×KH×KW`; `bias` has one entry per output channel.
#[must_use]
pub fn conv2d(input: &Array4<f32>, weight: &Array4<f32>, bias: &Array1<f32>, padding: usize) -> Array4<f32> {
    let (n, ic, h, w) = input.dim();
    let (oc, _, kh, kw) = weight.dim();
    let (oh, ow) = conv_output_hw((h, w), (kh, kw), (1, 1), (padding, padding));

    let mut out = Array4::zeros((n, oc, oh, ow));
    for b in 0..n {
        for o in 0..oc {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = bias[o];
                    for i in 0..ic {
                        for ky in 0..kh {
                            let iy = (oy + ky) as isize - padding as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (ox + kx) as isize - padding as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                acc += input[[b, i, iy as usize, ix as usize]]
                                    * weight[[o, i, ky, kx]];
                            }
                        }
                    }
                    out[[b, o, oy, ox]] = acc;
                }
            }
        }
    }
    out
}

/// Element-wise rectified linear unit.
#[must_use]
pub fn relu(x: &Array4<f32>) -> Array4<f32> {
    x.mapv(|v| v.max(0.0))
}

/// 2x2 max pooling with stride 2; odd trailing rows/columns are dropped.
#[must_use]
pub fn maxpool2(x: &Array4<f32>) -> Array4<f32> {
    let (n, c, h, w) = x.dim();
    let (oh, ow) = pool_output_hw((h, w), 2, 2);

    let mut out = Array4::zeros((n, c, oh, ow));
    for b in 0..n {
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let (y, x0) = (oy * 2, ox * 2);
                    let m = x[[b, ch, y, x0]]
                        .max(x[[b, ch, y, x0 + 1]])
                        .max(x[[b, ch, y + 1, x0]])
                        .max(x[[b, ch, y + 1, x0 + 1]]);
                    out[[b, ch, oy, ox]] = m;
                }
            }
        }
    }
    out
}

/// Global average pooling: mean over the spatial axes, `N×C×H×W -> N×C`.
#[must_use]
pub fn global_avg_pool(x: &Array4<f32>) -> Array2<f32> {
    let (n, c, h, w) = x.dim();
    let area = (h * w) as f32;
    let mut out = Array2::zeros((n, c));
    for b in 0..n {
        for ch in 0..c {
            let mut sum = 0.0;
            for y in 0..h {
                for xx in 0..w {
                    sum += x[[b, ch, y, xx]];
                }
            }
            out[[b, ch]] = sum / area;
        }
    }
    out
}

/// Fully connected layer: `x @ W^T + b` with `weight` in `OUT×IN` layout.
#[must_use]
pub fn linear(x: &Array2<f32>, weight: &Array2<f32>, bias: &Array1<f32>) -> Array2<f32> {
    x.dot(&weight.t()) + bias
}
