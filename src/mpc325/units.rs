// Unit conversion and handrails for MPC-325 coordinates
//
// The controller works in microsteps (16 per micron). Every coordinate is
// clamped into the travel range before and after conversion, never rejected.

use serde::{Deserialize, Serialize};

pub const STEPS_PER_MICRON: f64 = 16.0;
pub const MICRONS_PER_STEP: f64 = 0.0625;

/// Travel range in microns
pub const MIN_MICRONS: f64 = 0.0;
pub const MAX_MICRONS: f64 = 25_000.0;

/// Travel range in microsteps. The manual says 266667, the hardware accepts this.
pub const MIN_STEPS: i64 = 0;
pub const MAX_STEPS: i64 = 400_000;

/// Move rate in microns/second for each speed level.
/// Levels 14 and 15 (1218.75 and 1300) are left out: some units stall at them.
pub const MOVE_SPEEDS: [f64; 14] = [
    81.25, 162.5, 243.75, 325.0, 406.25, 487.5, 568.75, 650.0, 731.25, 812.5, 893.75, 975.0,
    1056.25, 1137.5,
];

/// Highest usable speed level
pub const MAX_SPEED_LEVEL: u8 = (MOVE_SPEEDS.len() - 1) as u8;

/// Rate of orthogonal quick moves, used for travel time estimates only
pub const QUICK_MOVE_RATE: f64 = 1300.0;

pub fn clamp_micron(microns: f64) -> f64 {
    if microns.is_nan() {
        return MIN_MICRONS;
    }
    microns.clamp(MIN_MICRONS, MAX_MICRONS)
}

pub fn clamp_step(steps: i64) -> u32 {
    steps.clamp(MIN_STEPS, MAX_STEPS) as u32
}

/// Microns to microsteps, rounded to the nearest step (unclamped)
pub fn micron_to_step(microns: f64) -> i64 {
    (microns * STEPS_PER_MICRON).round() as i64
}

pub fn step_to_micron(steps: u32) -> f64 {
    steps as f64 * MICRONS_PER_STEP
}

/// Microns to an on-wire coordinate, with both handrails applied
pub fn to_wire_steps(microns: f64) -> u32 {
    clamp_step(micron_to_step(clamp_micron(microns)))
}

pub fn clamp_speed_level(level: u8) -> u8 {
    level.min(MAX_SPEED_LEVEL)
}

/// Rate in microns/second of a speed level, clamped into the table
pub fn speed_rate(level: u8) -> f64 {
    MOVE_SPEEDS[clamp_speed_level(level) as usize]
}

/// Manipulator position in microns
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Position reported by the controller, in microsteps
    pub fn from_steps(steps: [u32; 3]) -> Self {
        let [x, y, z] = steps.map(|s| step_to_micron(clamp_step(s as i64)));
        Self { x, y, z }
    }

    /// Clamped on-wire microsteps for this position
    pub fn to_steps(&self) -> [u32; 3] {
        [self.x, self.y, self.z].map(to_wire_steps)
    }

    /// Sum of per-axis distances; each axis travels independently
    pub fn manhattan_distance(&self, other: &Position) -> f64 {
        (self.x - other.x).abs() + (self.y - other.y).abs() + (self.z - other.z).abs()
    }
}

/// Seconds needed to travel between two positions at `rate` microns/second
pub fn travel_seconds(from: &Position, to: &Position, rate: f64) -> f64 {
    from.manhattan_distance(to) / rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handrails() {
        assert_eq!(clamp_micron(-5.0), 0.0);
        assert_eq!(clamp_micron(30_000.0), 25_000.0);
        assert_eq!(clamp_micron(f64::NAN), 0.0);
        assert_eq!(clamp_micron(1234.5), 1234.5);

        assert_eq!(clamp_step(-1), 0);
        assert_eq!(clamp_step(500_000), 400_000);
        assert_eq!(clamp_step(1600), 1600);
    }

    #[test]
    fn test_conversion_stays_within_one_step() {
        let mut microns = 0.0;
        while microns <= MAX_MICRONS {
            let back = step_to_micron(to_wire_steps(microns));
            assert!(
                (back - microns).abs() <= MICRONS_PER_STEP,
                "{} -> {}",
                microns,
                back
            );
            microns += 17.0313;
        }
    }

    #[test]
    fn test_wire_steps_are_clamped() {
        assert_eq!(to_wire_steps(-100.0), 0);
        assert_eq!(to_wire_steps(25_000.0), 400_000);
        assert_eq!(to_wire_steps(99_999.0), 400_000);
        assert_eq!(to_wire_steps(100.0), 1600);
    }

    #[test]
    fn test_speed_table() {
        assert_eq!(MAX_SPEED_LEVEL, 13);
        assert_eq!(speed_rate(0), 81.25);
        assert_eq!(speed_rate(5), 487.5);
        assert_eq!(speed_rate(13), 1137.5);
        // 14 and 15 fall back to the fastest populated level
        assert_eq!(speed_rate(14), 1137.5);
        assert_eq!(speed_rate(15), 1137.5);
        for (level, rate) in MOVE_SPEEDS.iter().enumerate() {
            assert_eq!(*rate, 81.25 * (level as f64 + 1.0));
        }
    }

    #[test]
    fn test_travel_time_uses_manhattan_distance() {
        let from = Position::default();
        let to = Position::new(100.0, 200.0, 0.0);
        assert_eq!(from.manhattan_distance(&to), 300.0);

        let seconds = travel_seconds(&from, &to, speed_rate(5));
        assert!((seconds - 0.6154).abs() < 1e-3);
    }

    #[test]
    fn test_position_from_steps() {
        let position = Position::from_steps([1600, 16, 400_000]);
        assert_eq!(position, Position::new(100.0, 1.0, 25_000.0));
    }
}
