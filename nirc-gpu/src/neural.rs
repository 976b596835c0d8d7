use crate::{
    random_unit, GradientClearPassParams, GradientDescentPassParams,
    HashGridEntry, NnResetPassParams, OPTIMIZER_ADAM,
};

/// Gradients are accumulated as fixed-point integers so that kernels can sum
/// them with 32-bit integer atomics.
///
/// `GRADIENT_SAMPLE_CLAMP * GRADIENT_SCALE * MAX_TRAINING_THREADS` stays
/// below `2^31`, so a sub-step in which every thread touches the same
/// parameter cannot overflow.
pub const GRADIENT_SCALE: f32 = 512.0;

/// Largest magnitude a single sample may contribute to a parameter's
/// gradient.
pub const GRADIENT_SAMPLE_CLAMP: f32 = 16.0;

/// Most training threads a single sub-step may dispatch (enough for a
/// 3620x3620 frame).
pub const MAX_TRAINING_THREADS: u32 = 1 << 17;

/// Kernel: zeroes the gradient accumulators of parameter `id`.
pub fn gradient_clear(
    id: u32,
    params: &GradientClearPassParams,
    gradient: &mut [i32],
    gradient_count: &mut [u32],
) {
    if id >= params.param_count {
        return;
    }

    gradient[id as usize] = 0;
    gradient_count[id as usize] = 0;
}

/// Adds a single sample's gradient to parameter `param`; host-side
/// counterpart of the atomic adds issued by the training kernel.
pub fn gradient_accumulate(
    gradient: &mut [i32],
    gradient_count: &mut [u32],
    param: usize,
    value: f32,
) {
    let value = value.clamp(-GRADIENT_SAMPLE_CLAMP, GRADIENT_SAMPLE_CLAMP);

    let value = (value * GRADIENT_SCALE).round() as i32;

    gradient[param] = gradient[param].saturating_add(value);

    gradient_count[param] += 1;
}

/// Mean gradient of a parameter, or `None` if no sample touched it.
pub fn gradient_mean(gradient: i32, count: u32) -> Option<f32> {
    if count == 0 {
        None
    } else {
        Some(gradient as f32 / (GRADIENT_SCALE * count as f32))
    }
}

/// SGD with momentum and dampening; returns the updated weight and momentum
/// buffer.
pub fn sgd_step(
    weight: f32,
    grad: f32,
    momentum_buf: f32,
    step: u32,
    learning_rate: f32,
    momentum: f32,
    dampening: f32,
) -> (f32, f32) {
    let buf = if step == 0 {
        grad
    } else {
        momentum * momentum_buf + (1.0 - dampening) * grad
    };

    (weight - learning_rate * buf, buf)
}

/// Adam; returns the updated weight and first and second moments.
#[allow(clippy::too_many_arguments)]
pub fn adam_step(
    weight: f32,
    grad: f32,
    m: f32,
    v: f32,
    step: u32,
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
) -> (f32, f32, f32) {
    let m = beta1 * m + (1.0 - beta1) * grad;
    let v = beta2 * v + (1.0 - beta2) * grad * grad;

    // `step` counts from zero, bias correction from one
    let t = (step + 1) as i32;
    let m_hat = m / (1.0 - beta1.powi(t));
    let v_hat = v / (1.0 - beta2.powi(t));

    (weight - learning_rate * m_hat / (v_hat.sqrt() + epsilon), m, v)
}

/// Exponential moving average of the primal weights.
pub fn filter_weight(filtered: f32, primal: f32, alpha: f32) -> f32 {
    alpha * filtered + (1.0 - alpha) * primal
}

/// Number of optimizer-state elements kept per parameter.
pub fn aux_elements_per_param(optimizer: u32) -> u32 {
    if optimizer == OPTIMIZER_ADAM {
        2
    } else {
        1
    }
}

/// Kernel: applies one optimizer step to parameter `id` and refreshes its
/// filtered copy.
///
/// Optimizer state is laid out planar: `aux[k * param_count + id]`.
pub fn gradient_descent(
    id: u32,
    params: &GradientDescentPassParams,
    primal: &mut [f32],
    filtered: &mut [f32],
    gradient: &[i32],
    gradient_count: &[u32],
    aux: &mut [f32],
) {
    if id >= params.param_count {
        return;
    }

    let n = params.param_count as usize;
    let id = id as usize;

    if let Some(grad) = gradient_mean(gradient[id], gradient_count[id]) {
        if params.optimizer == OPTIMIZER_ADAM {
            let (weight, m, v) = adam_step(
                primal[id],
                grad,
                aux[id],
                aux[n + id],
                params.step,
                params.learning_rate,
                params.param_0,
                params.param_1,
                params.param_2,
            );

            primal[id] = weight;
            aux[id] = m;
            aux[n + id] = v;
        } else {
            let (weight, buf) = sgd_step(
                primal[id],
                grad,
                aux[id],
                params.step,
                params.learning_rate,
                params.param_0,
                params.param_1,
            );

            primal[id] = weight;
            aux[id] = buf;
        }
    }

    filtered[id] = filter_weight(filtered[id], primal[id], params.filter_alpha);
}

/// Initial value of parameter `id`, uniform in `lower ..= upper`.
pub fn initial_weight(seed: u32, id: u32, lower: f32, upper: f32) -> f32 {
    lower + (upper - lower) * random_unit(seed, id)
}

/// Kernel: re-initializes everything that belongs to thread `id`: its
/// parameter (both copies) with a reproducible random weight, its gradient
/// accumulators, its optimizer-state element and its feature-grid entry.
#[allow(clippy::too_many_arguments)]
pub fn parameter_reset(
    id: u32,
    params: &NnResetPassParams,
    primal: &mut [f32],
    filtered: &mut [f32],
    gradient: &mut [i32],
    gradient_count: &mut [u32],
    aux: &mut [f32],
    feature_entries: &mut [HashGridEntry],
) {
    let idx = id as usize;

    if id < params.param_count {
        let weight = initial_weight(
            params.seed,
            id,
            params.lower_bound,
            params.upper_bound,
        );

        primal[idx] = weight;
        filtered[idx] = weight;
        gradient[idx] = 0;
        gradient_count[idx] = 0;
    }

    if id < params.aux_count {
        aux[idx] = 0.0;
    }

    if id < params.feature_entry_count {
        feature_entries[idx] = HashGridEntry::EMPTY;
    }
}
