//! One module per phase graph. Contracts is the richest; the others share
//! the same engine with smaller graphs.

pub mod betting;
pub mod contracts;
pub mod hiddenrole;
pub mod trivia;
