//! Linear Ramped Value
//!
//! Ramps linearly to a target so that ramping `x -> y` over N ticks yields
//! `x` as the first value and `y` as the Nth.

/// A linearly ramped value, advanced one tick per sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampedValue {
    current: f32,
    target: f32,
    increment: f32,
    ticks_to_completion: u64,
}

impl RampedValue {
    pub fn new(value: f32) -> Self {
        Self {
            current: value,
            target: value,
            increment: 0.0,
            ticks_to_completion: 0,
        }
    }

    /// Set the current value and cancel any ramp
    pub fn set_value(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.ticks_to_completion = 0;
    }

    /// Start a linear ramp towards `target` over `ticks` ticks
    pub fn ramp_to(&mut self, target: f32, ticks: u64) {
        self.target = target;

        if ticks <= 1 || self.target == self.current {
            self.current = target;
            self.ticks_to_completion = 0;
        } else {
            self.ticks_to_completion = ticks - 1;
            self.increment = (self.target - self.current) / self.ticks_to_completion as f32;
        }
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.ticks_to_completion > 0
    }

    #[inline]
    pub fn value(&self) -> f32 {
        self.current
    }

    #[inline]
    pub fn target_value(&self) -> f32 {
        self.target
    }

    /// Return the current value and advance the ramp by one tick
    #[inline]
    pub fn tick(&mut self) -> f32 {
        let result = self.current;

        if self.ticks_to_completion > 0 {
            self.ticks_to_completion -= 1;
            self.current = self.target - self.ticks_to_completion as f32 * self.increment;
        } else {
            // Snap to avoid accumulated over/undershoot
            self.current = self.target;
        }

        result
    }
}

impl Default for RampedValue {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ramp_first_and_last_values() {
        let mut value = RampedValue::new(0.0);
        value.ramp_to(1.0, 5);

        let ticks: Vec<f32> = (0..5).map(|_| value.tick()).collect();
        assert_relative_eq!(ticks[0], 0.0);
        assert_relative_eq!(ticks[2], 0.5);
        assert_relative_eq!(ticks[4], 1.0);
        assert!(!value.is_ramping());
        assert_relative_eq!(value.tick(), 1.0);
    }

    #[test]
    fn test_short_ramp_jumps() {
        let mut value = RampedValue::new(0.25);
        value.ramp_to(0.75, 1);
        assert!(!value.is_ramping());
        assert_relative_eq!(value.value(), 0.75);
    }

    #[test]
    fn test_set_value_cancels_ramp() {
        let mut value = RampedValue::new(0.0);
        value.ramp_to(1.0, 100);
        value.tick();
        value.set_value(0.3);
        assert!(!value.is_ramping());
        assert_relative_eq!(value.target_value(), 0.3);
    }
}
