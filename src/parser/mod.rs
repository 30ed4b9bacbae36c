pub mod cells;
pub mod extract;
