#[cfg(test)]
pub mod gateway_submission_tests;
#[cfg(test)]
pub mod replay_guard_tests;
#[cfg(test)]
pub mod utils;
