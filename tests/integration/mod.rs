// Import the test harness
pub mod test_harness;

// Import individual test modules
pub mod file_store_test;
pub mod refresh_flow_test;
pub mod status_policy_test;
