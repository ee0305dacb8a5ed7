#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

pub mod catalog;
pub mod config;
pub mod manifest;
pub mod player;
pub mod resolver;
pub mod stream;
pub mod upload;
pub mod util;
