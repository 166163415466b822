/// Linear animation of a single value over a fixed duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationState {
    pub initial_value: f32,
    pub final_value: f32,
    /// Seconds
    pub duration: f32,
    /// Seconds
    pub elapsed: f32,
}

impl AnimationState {
    pub fn new(initial_value: f32, final_value: f32, duration: f32) -> Self {
        Self {
            initial_value,
            final_value,
            duration,
            elapsed: 0.0,
        }
    }

    /// Fraction of the duration that has passed, clamped to `[0, 1]`.
    pub fn progress(&self) -> f32 {
        if self.duration <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.duration).clamp(0.0, 1.0)
    }

    pub fn value(&self) -> f32 {
        self.initial_value + (self.final_value - self.initial_value) * self.progress()
    }

    /// Advance by `delta_seconds` and return the new value.
    pub fn advance(&mut self, delta_seconds: f32) -> f32 {
        self.elapsed += delta_seconds;
        self.value()
    }

    pub fn is_finished(&self) -> bool {
        self.progress() >= 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_value() {
        let anim = AnimationState::new(0.0, 1.0, 3.0);
        assert_eq!(anim.progress(), 0.0);
        assert_eq!(anim.value(), 0.0);
        assert!(!anim.is_finished());
    }

    #[test]
    fn interpolates_linearly() {
        let mut anim = AnimationState::new(2.0, 4.0, 4.0);
        assert_eq!(anim.advance(1.0), 2.5);
        assert_eq!(anim.advance(1.0), 3.0);
        assert_eq!(anim.progress(), 0.5);
    }

    #[test]
    fn clamps_past_duration() {
        let mut anim = AnimationState::new(0.0, 1.0, 3.0);
        anim.advance(10.0);
        assert_eq!(anim.progress(), 1.0);
        assert_eq!(anim.value(), 1.0);
        assert!(anim.is_finished());
    }

    #[test]
    fn negative_elapsed_clamps_to_start() {
        let mut anim = AnimationState::new(1.0, 0.0, 2.0);
        anim.advance(-1.0);
        assert_eq!(anim.value(), 1.0);
    }

    #[test]
    fn value_matches_lerp_across_duration() {
        let mut anim = AnimationState::new(0.0, 1.0, 3.0);
        for step in 1..=30 {
            let value = anim.advance(0.1);
            let expected = (step as f32 * 0.1 / 3.0).min(1.0);
            assert!((value - expected).abs() < 1e-5, "step {}: {} vs {}", step, value, expected);
        }
    }
}
