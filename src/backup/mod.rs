pub mod audit;
pub mod bucket;
pub mod capture;
pub mod config;
pub mod engine;
pub mod key;
pub mod media;
pub mod outcome;
pub mod paths;
pub mod snapshot;
pub mod util;
pub mod warn;
