use engine::{InputState, KeyCode};
use glam::{EulerRot, Mat4, Vec3};

const FORWARD_SPEED: f32 = 1.8;
const SIDE_SPEED: f32 = 1.1;
const START_POSITION: Vec3 = Vec3::new(-3.0, 1.0, 2.0);
const ROLL_AMPLITUDE_DEGREES: f32 = 10.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    const VECTORS: [Vec3; 4] = [
        Vec3::new(0.0, 0.0, 1.0),
        Vec3::new(0.0, 0.0, -1.0),
        Vec3::new(-1.0, 0.0, 0.0),
        Vec3::new(1.0, 0.0, 0.0),
    ];

    pub fn vector(self) -> Vec3 {
        Self::VECTORS[self as usize]
    }
}

/// Which way the player is pushing the boat this frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Steering {
    pub sideways: Option<Direction>,
    pub throttle: Option<Direction>,
}

impl Steering {
    /// A/D steer west/east, W/S speed up or hold back. Opposite keys cancel.
    pub fn from_input(input: &InputState) -> Self {
        let axis = |positive: KeyCode, negative: KeyCode, pos_dir, neg_dir| {
            match (input.is_pressed(positive), input.is_pressed(negative)) {
                (true, false) => Some(pos_dir),
                (false, true) => Some(neg_dir),
                _ => None,
            }
        };

        Self {
            sideways: axis(KeyCode::KeyA, KeyCode::KeyD, Direction::West, Direction::East),
            throttle: axis(KeyCode::KeyW, KeyCode::KeyS, Direction::North, Direction::South),
        }
    }

    /// Heading in degrees around the vertical axis.
    fn yaw(&self) -> f32 {
        match self.sideways {
            Some(Direction::West) => 135.0,
            Some(Direction::East) => 45.0,
            _ => 90.0,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Boat {
    pub position: Vec3,
    pub yaw: f32,
    pub roll: f32,
}

impl Boat {
    fn new() -> Self {
        Self {
            position: START_POSITION,
            yaw: 90.0,
            roll: 0.0,
        }
    }

    /// World matrix: translation, then yaw, pitch and roll in that order.
    pub fn world_matrix(&self) -> Mat4 {
        Mat4::from_translation(self.position)
            * Mat4::from_euler(
                EulerRot::YXZ,
                self.yaw.to_radians(),
                self.roll.to_radians(),
                0.0,
            )
    }

    /// How far north the boat has come since the start.
    pub fn distance(&self) -> f32 {
        self.position.z - START_POSITION.z
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum GameState {
    #[default]
    NotStarted,
    Running(Boat),
}

impl GameState {
    /// Moves the game forward by `delta` seconds. The first call starts the
    /// run without moving the boat.
    pub fn advance(self, steering: Steering, delta: f32, elapsed: f32) -> Self {
        let mut boat = match self {
            GameState::NotStarted => return GameState::Running(Boat::new()),
            GameState::Running(boat) => boat,
        };

        boat.position += FORWARD_SPEED * Direction::North.vector() * delta;
        if let Some(direction) = steering.sideways {
            boat.position += SIDE_SPEED * direction.vector() * delta;
        }
        if let Some(direction) = steering.throttle {
            boat.position += FORWARD_SPEED * direction.vector() * (delta / 2.0);
        }
        boat.yaw = steering.yaw();
        boat.roll = elapsed.sin() * ROLL_AMPLITUDE_DEGREES;

        GameState::Running(boat)
    }

    pub fn boat(&self) -> Option<&Boat> {
        match self {
            GameState::NotStarted => None,
            GameState::Running(boat) => Some(boat),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn first_update_starts_the_run_in_place() {
        let state = GameState::default();
        assert_eq!(state, GameState::NotStarted);
        assert!(state.boat().is_none());

        let state = state.advance(Steering::default(), 5.0, 5.0);
        let boat = state.boat().unwrap();
        assert_eq!(boat.position, START_POSITION);
        assert_eq!(boat.distance(), 0.0);
    }

    #[test]
    fn boat_drifts_north_without_input() {
        let state = GameState::NotStarted
            .advance(Steering::default(), 0.0, 0.0)
            .advance(Steering::default(), 1.0, 1.0);

        let boat = state.boat().unwrap();
        assert!(close(boat.position, START_POSITION + Vec3::new(0.0, 0.0, FORWARD_SPEED)));
        assert_eq!(boat.yaw, 90.0);
    }

    #[test]
    fn steering_moves_sideways_and_turns() {
        let steering = Steering {
            sideways: Some(Direction::East),
            throttle: Some(Direction::South),
        };
        let state = GameState::NotStarted
            .advance(steering, 0.0, 0.0)
            .advance(steering, 2.0, 0.0);

        let boat = state.boat().unwrap();
        let expected = START_POSITION
            + Vec3::new(-2.0 * SIDE_SPEED, 0.0, 2.0 * FORWARD_SPEED - FORWARD_SPEED);
        assert!(close(boat.position, expected));
        assert_eq!(boat.yaw, 45.0);
        assert_eq!(boat.roll, 0.0);
    }

    #[test]
    fn opposite_keys_cancel() {
        let mut input = InputState::default();
        input.set(KeyCode::KeyA, true);
        input.set(KeyCode::KeyD, true);
        input.set(KeyCode::KeyW, true);

        let steering = Steering::from_input(&input);
        assert_eq!(steering.sideways, None);
        assert_eq!(steering.throttle, Some(Direction::North));

        input.set(KeyCode::KeyD, false);
        assert_eq!(Steering::from_input(&input).sideways, Some(Direction::West));
    }

    #[test]
    fn directions_map_to_unit_axes() {
        assert_eq!(Direction::North.vector(), Vec3::Z);
        assert_eq!(Direction::South.vector(), -Vec3::Z);
        assert_eq!(Direction::East.vector(), -Vec3::X);
        assert_eq!(Direction::West.vector(), Vec3::X);
    }

    #[test]
    fn world_matrix_places_boat_at_its_position() {
        let boat = Boat::new();
        let origin = boat.world_matrix().transform_point3(Vec3::ZERO);
        assert!(close(origin, START_POSITION));
    }
}
