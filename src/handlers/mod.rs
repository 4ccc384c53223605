pub mod functions;
pub mod health;
pub mod logs;
pub mod objects;
pub mod stacks;
