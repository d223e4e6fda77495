pub mod archetypes;
pub mod boosting;
pub mod config;
pub mod export;
pub mod features;
pub mod kmeans;
pub mod logging;
pub mod pipeline;
pub mod profile;
pub mod projection;
pub mod similarity;
pub mod warehouse;
pub mod weights;
