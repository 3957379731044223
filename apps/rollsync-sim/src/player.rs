//! A square moved around by a random walk, as a stand-in for a real player.

use rand::{Rng, SeedableRng, rngs::StdRng};
use rollsync::{Networkable, NetworkedInputs, ObjectInput};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Pixels moved per tick at full axis strength.
const SPEED: f32 = 16.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

pub struct Player {
    position: Position,
    rng: StdRng,
    axis: (i8, i8),
    hold: u32,
}

impl Player {
    pub fn new(seed: u64) -> Self {
        Self {
            position: Position::default(),
            rng: StdRng::seed_from_u64(seed),
            axis: (0, 0),
            hold: 0,
        }
    }

    #[cfg(test)]
    fn position(&self) -> (f32, f32) {
        (self.position.x, self.position.y)
    }
}

fn lerp(from: f32, to: f32, weight: f32) -> f32 {
    from * (1.0 - weight) + to * weight
}

fn decode(state: &[u8]) -> Option<Position> {
    match postcard::from_bytes(state) {
        Ok(position) => Some(position),
        Err(err) => {
            warn!(error = %err, "ignoring malformed player state");
            None
        }
    }
}

impl Networkable for Player {
    fn tick(&mut self, _delta: f32, input: &ObjectInput) {
        let (x, y) = match input.data.as_slice() {
            [x, y] => (*x as i8, *y as i8),
            _ => (0, 0),
        };
        self.position.x += x as f32 * SPEED;
        self.position.y += y as f32 * SPEED;
    }

    fn save_state(&self) -> Vec<u8> {
        postcard::to_stdvec(&self.position).unwrap_or_default()
    }

    fn load_state(&mut self, state: &[u8]) {
        if let Some(position) = decode(state) {
            self.position = position;
        }
    }

    fn interpolate_state(&mut self, from: &[u8], to: &[u8], weight: f32) {
        if let (Some(from), Some(to)) = (decode(from), decode(to)) {
            self.position = Position {
                x: lerp(from.x, to.x, weight),
                y: lerp(from.y, to.y, weight),
            };
        }
    }
}

impl NetworkedInputs for Player {
    fn collect_local_input(&mut self) -> Option<ObjectInput> {
        if self.hold == 0 {
            self.axis = (self.rng.random_range(-1..=1), self.rng.random_range(-1..=1));
            self.hold = self.rng.random_range(4..20);
        }
        self.hold -= 1;

        match self.axis {
            (0, 0) => None,
            (x, y) => Some(ObjectInput::new(vec![x as u8, y as u8])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moves_along_the_input_axis() {
        let mut player = Player::new(0);
        player.tick(1.0 / 60.0, &ObjectInput::new(vec![1, (-1i8) as u8]));
        assert_eq!(player.position(), (SPEED, -SPEED));
        player.tick(1.0 / 60.0, &ObjectInput::default());
        assert_eq!(player.position(), (SPEED, -SPEED));
    }

    #[test]
    fn state_round_trip_and_interpolation() {
        let mut player = Player::new(0);
        let start = player.save_state();
        player.tick(1.0 / 60.0, &ObjectInput::new(vec![2, 0]));
        let end = player.save_state();

        player.interpolate_state(&start, &end, 0.25);
        assert_eq!(player.position(), (8.0, 0.0));
        player.load_state(&end);
        assert_eq!(player.position(), (32.0, 0.0));
    }

    #[test]
    fn same_seed_same_inputs() {
        let mut a = Player::new(9);
        let mut b = Player::new(9);
        for _ in 0..50 {
            assert_eq!(a.collect_local_input(), b.collect_local_input());
        }
    }
}
