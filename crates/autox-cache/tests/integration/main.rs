mod cache_tests;
mod common;
