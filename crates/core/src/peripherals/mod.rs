pub mod display;
pub mod keypad;
