#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;

pub mod app;
pub mod canvas;
pub mod cli;
pub mod config;
pub mod grid;
pub mod mint;
pub mod selection;
pub mod services;
pub mod theme;
