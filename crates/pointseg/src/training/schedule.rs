/// Step-decay learning-rate schedule.
///
/// Stepped once at the start of every epoch, before the epoch's first batch,
/// so epoch `e` (0-based) trains at `base_lr * gamma^floor((e + 1) / step_size)`.
#[derive(Debug, Clone)]
pub struct StepLr {
    base_lr: f64,
    step_size: usize,
    gamma: f64,
    epochs_stepped: usize,
}

impl StepLr {
    pub fn new(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            epochs_stepped: 0,
        }
    }

    /// Learning rate after `epochs_stepped` schedule steps.
    pub fn lr_after(&self, epochs_stepped: usize) -> f64 {
        let decays = (epochs_stepped / self.step_size) as i32;
        self.base_lr * self.gamma.powi(decays)
    }

    /// Advance one epoch and return the learning rate for it.
    pub fn step(&mut self) -> f64 {
        self.epochs_stepped += 1;
        self.current()
    }

    /// Learning rate currently in effect.
    pub fn current(&self) -> f64 {
        self.lr_after(self.epochs_stepped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halves_every_step_size_epochs() {
        let mut schedule = StepLr::new(1e-3, 2, 0.5);
        assert!((schedule.current() - 1e-3).abs() < 1e-15);

        // Epoch 0 and 1 are stepped to 1 and 2.
        let lrs: Vec<f64> = (0..6).map(|_| schedule.step()).collect();
        let expected = [1e-3, 5e-4, 5e-4, 2.5e-4, 2.5e-4, 1.25e-4];
        for (epoch, (got, want)) in lrs.iter().zip(expected).enumerate() {
            assert!((got - want).abs() < 1e-15, "epoch {epoch}: {got} != {want}");
        }
    }

    #[test]
    fn test_step_size_one_decays_from_first_epoch() {
        let mut schedule = StepLr::new(0.1, 1, 0.5);
        assert!((schedule.step() - 0.05).abs() < 1e-12);
        assert!((schedule.step() - 0.025).abs() < 1e-12);
    }
}
