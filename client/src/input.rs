//! Terminal command parsing
//!
//! One line of input becomes one [`Command`]:
//!
//! | line                   | command                             |
//! |------------------------|-------------------------------------|
//! | `start`                | start the game                      |
//! | `skip`                 | skip the current problem            |
//! | `42`, `-3`             | submit an answer                    |
//! | `new`                  | new game with the default config    |
//! | `new add,mul 1 12`     | new game with methods and range     |
//! | `help`, `quit`         | local only, nothing is sent         |

use shared::{ConfigError, GameConfig, NumberRange, Operation, SessionEvent};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Event(SessionEvent),
    Help,
    Quit,
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("empty input")]
    Empty,
    #[error("unknown command {0:?}, type `help`")]
    UnknownCommand(String),
    #[error("unknown operation {0:?}, use add, sub, mul or div")]
    UnknownOperation(String),
    #[error("range needs two integers, e.g. `new add 1 10`")]
    BadRange,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub const HELP: &str = "\
commands:
  start                 start the game
  <number>              answer the current problem
  skip                  skip the current problem
  new [ops] [min max]   start over, e.g. `new add,mul 1 12`
  quit                  leave the session";

pub fn parse_line(line: &str) -> Result<Command, InputError> {
    let mut words = line.split_whitespace();
    let Some(first) = words.next() else {
        return Err(InputError::Empty);
    };

    if let Ok(answer) = first.parse::<i64>() {
        return Ok(Command::Event(SessionEvent::SubmitAnswer { answer }));
    }

    match first.to_ascii_lowercase().as_str() {
        "start" => Ok(Command::Event(SessionEvent::StartGame)),
        "skip" => Ok(Command::Event(SessionEvent::SkipProblem)),
        "new" => {
            let rest: Vec<&str> = words.collect();
            let game_config = parse_config(&rest)?;
            Ok(Command::Event(SessionEvent::NewGame { game_config }))
        }
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(InputError::UnknownCommand(other.to_string())),
    }
}

fn parse_config(args: &[&str]) -> Result<GameConfig, InputError> {
    let defaults = GameConfig::default();
    let (methods, range_args) = match args.first() {
        Some(first) if first.parse::<i32>().is_err() => (parse_methods(first)?, &args[1..]),
        _ => (defaults.methods().to_vec(), args),
    };

    let range = match range_args {
        [] => defaults.range(),
        [min, max] => NumberRange {
            min: min.parse().map_err(|_| InputError::BadRange)?,
            max: max.parse().map_err(|_| InputError::BadRange)?,
        },
        _ => return Err(InputError::BadRange),
    };

    Ok(GameConfig::new(methods, range)?)
}

fn parse_methods(list: &str) -> Result<Vec<Operation>, InputError> {
    let mut methods = Vec::new();
    for name in list.split(',').filter(|s| !s.is_empty()) {
        let method = match name.to_ascii_lowercase().as_str() {
            "add" | "+" => Operation::Add,
            "sub" | "subtract" | "-" => Operation::Subtract,
            "mul" | "multiply" | "*" | "x" => Operation::Multiply,
            "div" | "divide" | "/" => Operation::Divide,
            other => return Err(InputError::UnknownOperation(other.to_string())),
        };
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}
