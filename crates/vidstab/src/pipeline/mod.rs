//! End-to-end stabilization: configuration, stage wiring and draining.

mod config;
mod report;
mod run;

#[cfg(test)]
mod tests;

pub use config::{
    DeblurConfig, EstimatorConfig, StabilizationMode, StabilizeConfig, WobbleConfig, OPTION_KEYS,
};
pub use report::RunReport;
pub use run::{stabilize, CancellationToken, Pipeline, DEFAULT_FPS};
