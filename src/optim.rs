//! Head optimizers.
//!
//! Fine-tuning updates only the classification head, so parameters are
//! flat buffers the trainer fills and writes back. Both optimizers
//! allocate their state lazily on the first step.

use ndarray::Array1;

/// A flat trainable parameter with an optional accumulated gradient.
#[derive(Debug, Clone)]
pub struct Param {
    data: Array1<f32>,
    grad: Option<Array1<f32>>,
}

impl Param {
    /// Wrap a flat buffer as a trainable parameter.
    #[must_use]
    pub fn new(data: Array1<f32>) -> Self {
        Self { data, grad: None }
    }

    /// Current values.
    #[must_use]
    pub fn data(&self) -> &Array1<f32> {
        &self.data
    }

    /// Mutable access to the values.
    pub fn data_mut(&mut self) -> &mut Array1<f32> {
        &mut self.data
    }

    /// Take ownership of the values.
    #[must_use]
    pub fn into_data(self) -> Array1<f32> {
        self.data
    }

    /// Accumulated gradient, when one is set.
    #[must_use]
    pub fn grad(&self) -> Option<&Array1<f32>> {
        self.grad.as_ref()
    }

    /// Replace the gradient buffer.
    pub fn set_grad(&mut self, grad: Array1<f32>) {
        self.grad = Some(grad);
    }

    /// Clear the gradient.
    pub fn zero_grad(&mut self) {
        self.grad = None;
    }
}

/// An optimization algorithm over flat parameters.
///
/// Parameters without a gradient are left untouched by `step`.
pub trait Optimizer {
    /// Apply one update using the accumulated gradients.
    fn step(&mut self, params: &mut [Param]);

    /// Clear the gradients of all parameters.
    fn zero_grad(&mut self, params: &mut [Param]) {
        for param in params {
            param.zero_grad();
        }
    }

    /// Current learning rate.
    fn lr(&self) -> f32;

    /// Adjust the learning rate.
    fn set_lr(&mut self, lr: f32);
}

/// Stochastic gradient descent with optional momentum.
pub struct Sgd {
    lr: f32,
    momentum: f32,
    velocities: Vec<Option<Array1<f32>>>,
}

impl Sgd {
    /// Create an optimizer; a `momentum` of 0.0 disables the velocity term.
    #[must_use]
    pub fn new(lr: f32, momentum: f32) -> Self {
        Self { lr, momentum, velocities: Vec::new() }
    }

    fn ensure_state(&mut self, params: &[Param]) {
        if self.velocities.is_empty() {
            self.velocities = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [Param]) {
        self.ensure_state(params);

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else { continue };

            if self.momentum > 0.0 {
                // v = momentum * v - lr * grad
                let velocity = match self.velocities[i].take() {
                    Some(v) => v * self.momentum - grad * self.lr,
                    None => grad * (-self.lr),
                };
                *param.data_mut() += &velocity;
                self.velocities[i] = Some(velocity);
            } else {
                let update = grad * (-self.lr);
                *param.data_mut() += &update;
            }
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

/// Adam with bias-corrected first and second moments.
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Option<Array1<f32>>>,
    v: Vec<Option<Array1<f32>>>,
}

impl Adam {
    /// Create an optimizer with explicit hyperparameters.
    #[must_use]
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self { lr, beta1, beta2, epsilon, t: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Adam with the usual defaults (beta1 0.9, beta2 0.999, epsilon 1e-8).
    #[must_use]
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    fn ensure_state(&mut self, params: &[Param]) {
        if self.m.is_empty() {
            self.m = params.iter().map(|_| None).collect();
            self.v = params.iter().map(|_| None).collect();
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Param]) {
        self.ensure_state(params);
        self.t += 1;

        // Bias correction folded into the step size:
        // lr_t = lr * sqrt(1 - beta2^t) / (1 - beta1^t)
        let lr_t = self.lr
            * ((1.0 - self.beta2.powi(self.t as i32)).sqrt()
                / (1.0 - self.beta1.powi(self.t as i32)));

        for (i, param) in params.iter_mut().enumerate() {
            let Some(grad) = param.grad() else { continue };

            // m_t = beta1 * m + (1 - beta1) * g
            let m_t = match self.m[i].take() {
                Some(m) => m * self.beta1 + grad * (1.0 - self.beta1),
                None => grad * (1.0 - self.beta1),
            };

            // v_t = beta2 * v + (1 - beta2) * g^2
            let grad_sq = grad * grad;
            let v_t = match self.v[i].take() {
                Some(v) => v * self.beta2 + &grad_sq * (1.0 - self.beta2),
                None => grad_sq * (1.0 - self.beta2),
            };

            // theta -= lr_t * m_t / (sqrt(v_t) + epsilon)
            let denom = v_t.mapv(f32::sqrt) + self.epsilon;
            let update = &m_t / &denom * lr_t;
            *param.data_mut() -= &update;

            self.m[i] = Some(m_t);
            self.v[i] = Some(v_t);
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    fn param(values: &[f32]) -> Param {
        Param::new(arr1(values))
    }

    #[test]
    fn test_param_gradient_lifecycle() {
        let mut p = param(&[1.0, 2.0]);
        assert!(p.grad().is_none());

        p.set_grad(arr1(&[0.5, 0.5]));
        assert!(p.grad().is_some());

        p.zero_grad();
        assert!(p.grad().is_none());
        assert_eq!(p.into_data(), arr1(&[1.0, 2.0]));
    }

    #[test]
    fn test_sgd_step_moves_against_gradient() {
        let mut opt = Sgd::new(0.1, 0.0);
        let mut params = vec![param(&[1.0, 2.0, 3.0])];
        params[0].set_grad(arr1(&[0.5, 1.0, 1.5]));

        opt.step(&mut params);

        let data = params[0].data();
        assert_relative_eq!(data[0], 0.95, epsilon = 1e-6);
        assert_relative_eq!(data[1], 1.9, epsilon = 1e-6);
        assert_relative_eq!(data[2], 2.85, epsilon = 1e-6);
    }

    #[test]
    fn test_sgd_skips_params_without_gradient() {
        let mut opt = Sgd::new(0.1, 0.0);
        let mut params = vec![param(&[1.0, 2.0])];

        opt.step(&mut params);
        assert_eq!(params[0].data(), &arr1(&[1.0, 2.0]));
    }

    #[test]
    fn test_sgd_momentum_accumulates_velocity() {
        let mut opt = Sgd::new(0.1, 0.9);
        let mut params = vec![param(&[1.0])];

        params[0].set_grad(arr1(&[1.0]));
        opt.step(&mut params);
        // v1 = -0.1, p = 0.9
        assert_relative_eq!(params[0].data()[0], 0.9, epsilon = 1e-6);

        params[0].set_grad(arr1(&[1.0]));
        opt.step(&mut params);
        // v2 = 0.9 * -0.1 - 0.1 = -0.19, p = 0.71
        assert_relative_eq!(params[0].data()[0], 0.71, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_grad_clears_all_params() {
        let mut opt = Sgd::new(0.1, 0.0);
        let mut params = vec![param(&[1.0]), param(&[2.0])];
        params[0].set_grad(arr1(&[1.0]));
        params[1].set_grad(arr1(&[1.0]));

        opt.zero_grad(&mut params);
        assert!(params.iter().all(|p| p.grad().is_none()));
    }

    #[test]
    fn test_adam_first_step_is_about_lr() {
        // With bias correction the first step has magnitude close to lr
        // regardless of the gradient scale.
        let mut opt = Adam::default_params(0.1);
        let mut params = vec![param(&[1.0])];
        params[0].set_grad(arr1(&[1.0]));

        opt.step(&mut params);
        assert_relative_eq!(params[0].data()[0], 0.9, epsilon = 1e-3);
    }

    #[test]
    fn test_adam_converges_on_quadratic() {
        // Minimize (x - 3)^2 from x = 0.
        let mut opt = Adam::default_params(0.1);
        let mut params = vec![param(&[0.0])];

        for _ in 0..200 {
            let x = params[0].data()[0];
            params[0].set_grad(arr1(&[2.0 * (x - 3.0)]));
            opt.step(&mut params);
        }
        assert!((params[0].data()[0] - 3.0).abs() < 0.2);
    }

    #[test]
    fn test_adam_skips_params_without_gradient() {
        let mut opt = Adam::default_params(0.1);
        let mut params = vec![param(&[1.0, 2.0])];

        opt.step(&mut params);
        assert_eq!(params[0].data(), &arr1(&[1.0, 2.0]));
    }

    #[test]
    fn test_learning_rate_is_adjustable() {
        let mut opt = Sgd::new(0.1, 0.0);
        assert_relative_eq!(opt.lr(), 0.1);
        opt.set_lr(0.01);
        assert_relative_eq!(opt.lr(), 0.01);

        let mut adam = Adam::default_params(0.1);
        adam.set_lr(0.05);
        assert_relative_eq!(adam.lr(), 0.05);
    }
}
