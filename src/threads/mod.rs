pub mod chord;
pub mod join;
pub mod web;
