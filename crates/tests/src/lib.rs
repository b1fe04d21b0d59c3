pub mod fixtures;

#[cfg(test)]
mod asr_api_tests;
#[cfg(test)]
mod session_ws_tests;
