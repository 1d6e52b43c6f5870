//! Problem set generation

use rand::seq::SliceRandom;
use rand::Rng;
use shared::{GameConfig, Operation, Problem, PROBLEMS_PER_GAME};

/// Generates a full problem set for `config`.
///
/// Always returns [`PROBLEMS_PER_GAME`] problems. Operands are drawn uniformly
/// from the configured range and ordered so that `operand1 >= operand2`.
/// A division whose divisor comes up as zero is rewritten to divide by one.
pub fn generate<R: Rng + ?Sized>(config: &GameConfig, rng: &mut R) -> Vec<Problem> {
    (0..PROBLEMS_PER_GAME)
        .map(|_| generate_one(config, rng))
        .collect()
}

fn generate_one<R: Rng + ?Sized>(config: &GameConfig, rng: &mut R) -> Problem {
    // GameConfig guarantees a non-empty method list.
    let method = config
        .methods()
        .choose(rng)
        .copied()
        .unwrap_or(Operation::Add);

    let range = config.range();
    let mut operand1 = i64::from(rng.gen_range(range.min..=range.max));
    let mut operand2 = i64::from(rng.gen_range(range.min..=range.max));
    if operand2 > operand1 {
        std::mem::swap(&mut operand1, &mut operand2);
    }

    let answer = match method {
        Operation::Add => operand1 + operand2,
        Operation::Subtract => operand1 - operand2,
        Operation::Multiply => operand1 * operand2,
        Operation::Divide => {
            if operand2 == 0 {
                operand2 = 1;
                operand1
            } else {
                operand1 / operand2
            }
        }
    };

    Problem {
        operand1,
        operand2,
        method,
        answer,
    }
}
