/// What a reconstruction run reports back besides the candidate itself.
///
/// All fields describe the *winning* restart except `restart_losses`, which
/// keeps every restart's final loss for diagnosing flaky seeds.
#[derive(Debug, Clone)]
pub struct RecoveryStats {
    final_loss: f32,
    iterations: usize,
    restarts: usize,
    restart_losses: Vec<f32>,
    trajectory: Vec<(usize, f32)>,
    inferred_labels: Option<Vec<usize>>,
}

impl RecoveryStats {
    pub(crate) fn new(
        final_loss: f32,
        iterations: usize,
        restarts: usize,
        restart_losses: Vec<f32>,
        trajectory: Vec<(usize, f32)>,
        inferred_labels: Option<Vec<usize>>,
    ) -> Self {
        Self {
            final_loss,
            iterations,
            restarts,
            restart_losses,
            trajectory,
            inferred_labels,
        }
    }

    /// The best objective value reached by the winning restart.
    pub fn final_loss(&self) -> f32 {
        self.final_loss
    }

    /// Amount of iterations the winning restart ran.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }

    pub fn restart_losses(&self) -> &[f32] {
        &self.restart_losses
    }

    /// `(iteration, loss)` samples of the winning restart, recorded at the
    /// configured callback interval. Empty when callbacks are off.
    pub fn trajectory(&self) -> &[(usize, f32)] {
        &self.trajectory
    }

    /// The labels the run worked with, when they had to be inferred from the
    /// gradient rather than being supplied.
    pub fn inferred_labels(&self) -> Option<&[usize]> {
        self.inferred_labels.as_deref()
    }
}
