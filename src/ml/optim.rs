//! Bounded Nelder-Mead simplex minimizer used for likelihood estimation.

/// Tuning for [`NelderMead`].
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    pub max_iterations: usize,
    /// Spread of simplex values, relative to `1 + |best|`, at which to stop.
    pub tolerance: f64,
    pub initial_step: f64,
    pub reflection: f64,
    pub expansion: f64,
    pub contraction: f64,
    pub shrink: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-8,
            initial_step: 0.1,
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimum {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Derivative-free minimizer over a box.
#[derive(Debug, Clone)]
pub struct NelderMead {
    options: NelderMeadOptions,
    bounds: Vec<(f64, f64)>,
}

impl NelderMead {
    /// `bounds` must have one `(low, high)` pair per dimension.
    pub fn new(options: NelderMeadOptions, bounds: Vec<(f64, f64)>) -> Self {
        Self { options, bounds }
    }

    fn project(&self, point: &mut [f64]) {
        for (x, &(lo, hi)) in point.iter_mut().zip(&self.bounds) {
            *x = x.clamp(lo, hi);
        }
    }

    pub fn minimize<F>(&self, objective: F, initial: &[f64]) -> Minimum
    where
        F: Fn(&[f64]) -> f64,
    {
        let n = initial.len();
        // Non-finite objective values rank below everything
        let eval = |x: &[f64]| {
            let v = objective(x);
            if v.is_finite() { v } else { f64::INFINITY }
        };

        if n == 0 {
            return Minimum {
                point: Vec::new(),
                value: eval(initial),
                iterations: 0,
                converged: true,
            };
        }

        let opts = &self.options;
        let mut start = initial.to_vec();
        self.project(&mut start);

        let mut simplex: Vec<Vec<f64>> = vec![start.clone()];
        for i in 0..n {
            let mut vertex = start.clone();
            let (lo, hi) = self.bounds[i];
            // Step away from the nearer bound
            vertex[i] = if vertex[i] + opts.initial_step <= hi {
                vertex[i] + opts.initial_step
            } else {
                (vertex[i] - opts.initial_step).max(lo)
            };
            simplex.push(vertex);
        }
        let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

        let mut iterations = 0;
        let mut converged = false;

        while iterations < opts.max_iterations {
            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
            simplex = order.iter().map(|&i| simplex[i].clone()).collect();
            values = order.iter().map(|&i| values[i]).collect();

            if self.has_converged(&simplex, &values) {
                converged = true;
                break;
            }
            iterations += 1;

            let centroid: Vec<f64> = (0..n)
                .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
                .collect();
            let toward = |from: &[f64], coeff: f64| -> Vec<f64> {
                let mut p: Vec<f64> = centroid
                    .iter()
                    .zip(from)
                    .map(|(c, x)| c + coeff * (x - c))
                    .collect();
                self.project(&mut p);
                p
            };

            let worst = simplex[n].clone();
            let reflected = toward(&worst, -opts.reflection);
            let f_reflected = eval(&reflected);

            if f_reflected < values[0] {
                let expanded = toward(&worst, -opts.reflection * opts.expansion);
                let f_expanded = eval(&expanded);
                if f_expanded < f_reflected {
                    simplex[n] = expanded;
                    values[n] = f_expanded;
                } else {
                    simplex[n] = reflected;
                    values[n] = f_reflected;
                }
                continue;
            }

            if f_reflected < values[n - 1] {
                simplex[n] = reflected;
                values[n] = f_reflected;
                continue;
            }

            let (contracted, f_contracted) = if f_reflected < values[n] {
                let c = toward(&reflected, opts.contraction);
                let f = eval(&c);
                (c, f)
            } else {
                let c = toward(&worst, opts.contraction);
                let f = eval(&c);
                (c, f)
            };

            if f_contracted < values[n].min(f_reflected) {
                simplex[n] = contracted;
                values[n] = f_contracted;
                continue;
            }

            let best = simplex[0].clone();
            for i in 1..=n {
                let mut p: Vec<f64> = best
                    .iter()
                    .zip(&simplex[i])
                    .map(|(b, x)| b + opts.shrink * (x - b))
                    .collect();
                self.project(&mut p);
                values[i] = eval(&p);
                simplex[i] = p;
            }
        }

        let best = (0..=n)
            .min_by(|&a, &b| values[a].total_cmp(&values[b]))
            .unwrap_or(0);
        Minimum {
            point: simplex[best].clone(),
            value: values[best],
            iterations,
            converged,
        }
    }

    fn has_converged(&self, simplex: &[Vec<f64>], values: &[f64]) -> bool {
        let tol = self.options.tolerance;
        let best = values[0];
        let worst = values[values.len() - 1];
        if !best.is_finite() || !worst.is_finite() {
            return false;
        }
        let value_spread = (worst - best).abs() <= tol * (1.0 + best.abs());
        let vertex_spread = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        value_spread || vertex_spread <= tol.sqrt() * 1e-2
    }
}
