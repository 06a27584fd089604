mod diff_tests;
mod engine_tests;
mod helpers;
