//! Markov decision processes, their partially observable extension,
//! belief tracking and tabular value iteration.

pub mod array;
pub mod belief;
pub mod model;
pub mod parse;
pub mod solver;
