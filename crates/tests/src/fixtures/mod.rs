pub mod test_app;
#[cfg(test)]
pub mod ws_client;
