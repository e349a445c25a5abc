pub mod common;
mod fetcher_tests;
mod harvest_tests;
mod provider_tests;
