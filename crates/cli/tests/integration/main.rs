mod common;
mod list_tests;
mod status_tests;
