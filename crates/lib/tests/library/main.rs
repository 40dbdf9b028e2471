mod provisioning_tests;
mod status_tests;
